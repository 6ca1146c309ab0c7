//! nixfleet - Entry Point
//!
//! Builds NixOS hosts of a deployment and rolls them out over SSH.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use nixfleet::app::options::{
    AppOptions, DeployOptions, NixOptions, SelectOptions, SshOptions, SwitchAction,
};
use nixfleet::app::run::{run, Command};
use nixfleet::errors::FleetError;
use nixfleet::logs::{init_logging, LogLevel, LogOptions};
use nixfleet::models::UploadPhase;
use nixfleet::utils::version_info;

/// Exit code of a run cut short by a signal
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "nixfleet", version, about = "NixOS fleet deployment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info", env = "NIXFLEET_LOG_LEVEL")]
    log_level: LogLevel,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the selected hosts
    Build(CommonArgs),
    /// Build and copy closures to the selected hosts
    Push(CommonArgs),
    /// Build, push, activate and health check the selected hosts
    Deploy {
        #[command(flatten)]
        common: CommonArgs,

        /// One of dry-activate, test, switch, boot
        #[arg(default_value = "switch")]
        switch_action: SwitchAction,

        /// Upload secrets as part of the rollout
        #[arg(long)]
        upload_secrets: bool,

        /// Reboot hosts after activation
        #[arg(long)]
        reboot: bool,

        /// Seconds to wait for a rebooted host to come back
        #[arg(long, default_value_t = 600)]
        reboot_timeout: u64,

        /// Skip pre-deploy checks
        #[arg(long)]
        skip_pre_deploy_checks: bool,

        /// Build only, do not touch any host
        #[arg(long)]
        dry_run: bool,
    },
    /// Run health checks of the selected hosts
    CheckHealth(CommonArgs),
    /// Upload secrets to the selected hosts
    UploadSecrets {
        #[command(flatten)]
        common: CommonArgs,

        /// Only upload secrets of this phase (pre-activation, post-activation)
        #[arg(long)]
        phase: Option<String>,
    },
    /// List secrets of the selected hosts
    ListSecrets {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        json: bool,
    },
    /// Run a command on the selected hosts
    Exec {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
    /// Print the execution plan as JSON without running it
    Plan {
        #[command(flatten)]
        common: CommonArgs,

        /// Plan a push as well as the build
        #[arg(long)]
        push: bool,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment file
    deployment: PathBuf,

    /// Glob of host names to select
    #[arg(long = "on", default_value = "*")]
    on: String,

    /// Only select hosts carrying all of these tags
    #[arg(long, value_delimiter = ',')]
    tagged: Vec<String>,

    /// Order hosts by these tags, overriding the deployment's ordering
    #[arg(long, value_delimiter = ',')]
    order_by_tags: Vec<String>,

    /// Skip the first N selected hosts
    #[arg(long, default_value_t = 0)]
    skip: usize,

    /// Select every Nth host
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Select at most N hosts, 0 = all
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Nix expression turning the deployment into machines
    #[arg(long, env = "NIXFLEET_EVAL_MACHINES")]
    eval_machines: PathBuf,

    /// Pass --show-trace to nix
    #[arg(long)]
    show_trace: bool,

    /// Extra nix-build argument, may be repeated
    #[arg(long = "build-arg")]
    build_args: Vec<String>,

    /// Seconds to wait for commands and check groups, 0 = unbounded
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Skip health checks
    #[arg(long)]
    skip_health_checks: bool,

    /// Ask for the remote sudo password once
    #[arg(long)]
    passwd: bool,

    /// Print the plan instead of running it
    #[arg(long)]
    plan_only: bool,

    /// Maximum number of plan steps running at once
    #[arg(long, default_value_t = 8)]
    max_parallel: usize,
}

impl CommonArgs {
    fn into_options(self) -> AppOptions {
        AppOptions {
            ssh: SshOptions {
                ask_for_sudo_password: self.passwd,
                ..SshOptions::from_env()
            },
            select: SelectOptions {
                glob: self.on,
                tags: self.tagged,
                ordering_tags: self.order_by_tags,
                skip: self.skip,
                every: self.every,
                limit: self.limit,
            },
            nix: NixOptions {
                eval_machines: self.eval_machines,
                show_trace: self.show_trace,
                build_args: self.build_args,
            },
            deploy: DeployOptions {
                deployment: self.deployment,
                timeout: self.timeout,
                skip_health_checks: self.skip_health_checks,
                plan_only: self.plan_only,
                max_parallel: self.max_parallel,
                ..Default::default()
            },
        }
    }
}

fn parse(command: Commands) -> Result<(AppOptions, Command), FleetError> {
    Ok(match command {
        Commands::Build(common) => (common.into_options(), Command::Build),
        Commands::Push(common) => (common.into_options(), Command::Push),
        Commands::Deploy {
            common,
            switch_action,
            upload_secrets,
            reboot,
            reboot_timeout,
            skip_pre_deploy_checks,
            dry_run,
        } => {
            let mut options = common.into_options();
            options.deploy.switch_action = switch_action;
            options.deploy.upload_secrets = upload_secrets;
            options.deploy.reboot = reboot;
            options.deploy.reboot_timeout = Duration::from_secs(reboot_timeout);
            options.deploy.skip_pre_deploy_checks = skip_pre_deploy_checks;
            options.deploy.dry_run = dry_run;
            (options, Command::Deploy)
        }
        Commands::CheckHealth(common) => (common.into_options(), Command::CheckHealth),
        Commands::UploadSecrets { common, phase } => {
            let phase = phase.map(|phase| parse_phase(&phase)).transpose()?;
            (common.into_options(), Command::UploadSecrets { phase })
        }
        Commands::ListSecrets { common, json } => {
            (common.into_options(), Command::ListSecrets { as_json: json })
        }
        Commands::Exec { common, argv } => (common.into_options(), Command::Exec { argv }),
        Commands::Plan { common, push } => (common.into_options(), Command::Plan { push }),
    })
}

fn parse_phase(phase: &str) -> Result<UploadPhase, FleetError> {
    serde_json::from_value(serde_json::Value::from(phase)).map_err(|_| {
        FleetError::ConfigError(format!(
            "Invalid upload phase '{}', expected pre-activation or post-activation",
            phase
        ))
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_options = LogOptions {
        log_level: cli.log_level.clone(),
        json_format: cli.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let version = version_info();
    info!("nixfleet {} ({})", version.version, version.git_hash);

    let (options, command) = match parse(cli.command) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run(options, command, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(FleetError::Interrupted) => ExitCode::from(INTERRUPTED_EXIT_CODE),
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers");
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        } else {
            std::future::pending::<()>().await;
        }
    }
}
