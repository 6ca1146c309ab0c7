//! Command dispatch for one invocation

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::app::options::AppOptions;
use crate::deploy::Orchestrator;
use crate::errors::FleetError;
use crate::models::UploadPhase;
use crate::nix::NixContext;
use crate::planner::PlanKind;
use crate::selector::select_hosts;
use crate::ssh::SshContext;

/// What to do with the selected hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Build,
    Push,
    Deploy,
    CheckHealth,
    UploadSecrets { phase: Option<UploadPhase> },
    ListSecrets { as_json: bool },
    Exec { argv: Vec<String> },
    /// Print the plan of a build, or of a push, as JSON
    Plan { push: bool },
}

impl Command {
    fn plan_kind(&self) -> Option<PlanKind> {
        match self {
            Command::Build => Some(PlanKind::Build),
            Command::Push | Command::Deploy => Some(PlanKind::Push),
            _ => None,
        }
    }
}

/// Evaluate the deployment, select hosts and run `command` on them.
///
/// The command is abandoned when `shutdown_signal` resolves first; every
/// temporary resource it holds is released as it is dropped.
pub async fn run(
    options: AppOptions,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FleetError> {
    tokio::select! {
        result = execute(options, command) => result,
        _ = shutdown_signal => {
            warn!("Interrupted, cleaning up...");
            Err(FleetError::Interrupted)
        }
    }
}

async fn execute(options: AppOptions, command: Command) -> Result<(), FleetError> {
    let nix = Arc::new(NixContext::new(options.nix.clone(), options.ssh.clone()));

    let deployment = nix.get_machines(&options.deploy.deployment).await?;
    let hosts = select_hosts(&deployment, &options.select)?;

    let orchestrator = Orchestrator::new(
        Arc::new(SshContext::new(options.ssh.clone())),
        nix.clone(),
        nix,
        options.deploy.clone(),
    );

    if options.deploy.plan_only {
        if let Some(kind) = command.plan_kind() {
            print!("{}", orchestrator.plan(&hosts, kind).render());
            return Ok(());
        }
    }

    match command {
        Command::Build => print_closures(orchestrator.build(&hosts).await?),
        Command::Push => print_closures(orchestrator.push(&hosts).await?),
        Command::Deploy => orchestrator.deploy(&hosts).await?,
        Command::CheckHealth => orchestrator.check_health(&hosts).await?,
        Command::UploadSecrets { phase } => orchestrator.upload_secrets(&hosts, phase).await?,
        Command::ListSecrets { as_json } => println!("{}", orchestrator.list_secrets(&hosts, as_json)?),
        Command::Exec { argv } => orchestrator.exec(&hosts, &argv).await?,
        Command::Plan { push } => {
            let kind = if push { PlanKind::Push } else { PlanKind::Build };
            println!("{}", serde_json::to_string_pretty(&orchestrator.plan(&hosts, kind))?);
        }
    }

    Ok(())
}

fn print_closures(closures: Vec<(String, String)>) {
    for (host, closure) in closures {
        println!("{}: {}", host, closure);
    }
}
