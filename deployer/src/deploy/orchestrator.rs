//! Command implementations shared by the CLI

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::options::DeployOptions;
use crate::deploy::activate::activate;
use crate::errors::FleetError;
use crate::healthchecks::{perform_health_checks, perform_pre_deploy_checks};
use crate::models::{Host, UploadPhase};
use crate::nix::{NixBuilder, Transfer};
use crate::planner::{create_plan, PlanKind, Scheduler, Step};
use crate::secrets;
use crate::ssh::RemoteShell;

/// Everything a command needs, built once per invocation
pub struct Orchestrator {
    shell: Arc<dyn RemoteShell>,
    builder: Arc<dyn NixBuilder>,
    transfer: Arc<dyn Transfer>,
    options: DeployOptions,
}

impl Orchestrator {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        builder: Arc<dyn NixBuilder>,
        transfer: Arc<dyn Transfer>,
        options: DeployOptions,
    ) -> Self {
        Self {
            shell,
            builder,
            transfer,
            options,
        }
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    /// Plan a build, or a build followed by a push
    pub fn plan(&self, hosts: &[Host], kind: PlanKind) -> Step {
        create_plan(hosts, kind)
    }

    async fn execute_plan(&self, hosts: &[Host], kind: PlanKind) -> Result<Scheduler, FleetError> {
        let plan = self.plan(hosts, kind);
        let scheduler = Scheduler::new(
            self.builder.clone(),
            self.transfer.clone(),
            self.options.deployment.clone(),
            hosts,
            self.options.max_parallel,
        );
        scheduler.execute(&plan).await?;
        Ok(scheduler)
    }

    async fn closures(&self, scheduler: &Scheduler, hosts: &[Host]) -> Result<Vec<(String, String)>, FleetError> {
        let mut closures = Vec::with_capacity(hosts.len());
        for host in hosts {
            let closure = scheduler.closure_for(&host.name).await?.ok_or_else(|| {
                FleetError::BuildError(format!("No closure was built for {}", host.name))
            })?;
            closures.push((host.name.clone(), closure));
        }
        Ok(closures)
    }

    /// Build every host and return `(host, closure)` pairs
    pub async fn build(&self, hosts: &[Host]) -> Result<Vec<(String, String)>, FleetError> {
        let scheduler = self.execute_plan(hosts, PlanKind::Build).await?;
        self.closures(&scheduler, hosts).await
    }

    /// Build every host and copy the closures to all but the build-only ones
    pub async fn push(&self, hosts: &[Host]) -> Result<Vec<(String, String)>, FleetError> {
        let scheduler = self.execute_plan(hosts, PlanKind::Push).await?;
        self.closures(&scheduler, hosts).await
    }

    /// Build every host, then push and roll out host by host.
    ///
    /// A failing check halts the rollout before the next host is touched;
    /// hosts already activated stay as they are.
    pub async fn deploy(&self, hosts: &[Host]) -> Result<(), FleetError> {
        let closures = self.build(hosts).await?;

        if self.options.dry_run {
            info!("Dry run, not touching any host");
            return Ok(());
        }

        for (host, (_, closure)) in hosts.iter().zip(closures) {
            if host.build_only {
                info!("Deployment steps are disabled for build-only host: {}", host.name);
                continue;
            }
            self.deploy_host(host, &closure).await?;
        }

        Ok(())
    }

    async fn deploy_host(&self, host: &Host, closure: &str) -> Result<(), FleetError> {
        info!("Pushing {} to {}", closure, host.name);
        self.transfer.copy(closure, host).await?;

        let action = self.options.switch_action;
        let upload_secrets = self.options.upload_secrets && action.allows_secrets();
        let deployment_dir = self.options.deployment_dir();

        if upload_secrets {
            secrets::upload_secrets(
                self.shell.as_ref(),
                host,
                &deployment_dir,
                Some(UploadPhase::PreActivation),
                self.options.timeout,
            )
            .await?;
        }

        if !self.options.skip_pre_deploy_checks {
            if let Err(e) = perform_pre_deploy_checks(self.shell.clone(), host, self.options.timeout).await {
                error!("Not deploying to additional hosts, since a host pre-deploy check failed.");
                return Err(e);
            }
        }

        activate(self.shell.as_ref(), host, closure, action).await?;

        if self.options.reboot {
            if let Err(e) = self.shell.reboot(host, self.options.reboot_timeout).await {
                error!("Reboot failed");
                return Err(e);
            }
        }

        if upload_secrets {
            secrets::upload_secrets(
                self.shell.as_ref(),
                host,
                &deployment_dir,
                Some(UploadPhase::PostActivation),
                self.options.timeout,
            )
            .await?;
        }

        if !self.options.skip_health_checks {
            if let Err(e) = perform_health_checks(self.shell.clone(), host, self.options.timeout).await {
                error!("Not deploying to additional hosts, since a host health check failed.");
                return Err(e);
            }
        }

        info!("Done: {}", host.name);
        Ok(())
    }

    /// Run health checks on every host, reporting failures at the end
    pub async fn check_health(&self, hosts: &[Host]) -> Result<(), FleetError> {
        let mut failed = false;

        for host in hosts {
            if host.build_only {
                info!("Healthchecks are disabled for build-only host: {}", host.name);
                continue;
            }
            if let Err(e) = perform_health_checks(self.shell.clone(), host, self.options.timeout).await {
                warn!("Health checks of {} failed: {}", host.name, e);
                failed = true;
            }
        }

        if failed {
            return Err(FleetError::CheckError(
                "One or more errors occurred during host healthchecks".to_string(),
            ));
        }

        Ok(())
    }

    /// Upload secrets host by host, checking each host's health afterwards
    pub async fn upload_secrets(&self, hosts: &[Host], phase: Option<UploadPhase>) -> Result<(), FleetError> {
        let deployment_dir = self.options.deployment_dir();

        for host in hosts {
            if host.build_only {
                info!("Secret upload is disabled for build-only host: {}", host.name);
                continue;
            }

            secrets::upload_secrets(self.shell.as_ref(), host, &deployment_dir, phase, self.options.timeout)
                .await?;

            if !self.options.skip_health_checks {
                if let Err(e) = perform_health_checks(self.shell.clone(), host, self.options.timeout).await {
                    error!("Not uploading to additional hosts, since a host health check failed.");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Listing of every host's secrets, as JSON or for humans
    pub fn list_secrets(&self, hosts: &[Host], as_json: bool) -> Result<String, FleetError> {
        if as_json {
            let deployment_dir = std::path::absolute(self.options.deployment_dir())?;
            secrets::list_secrets_json(hosts, &deployment_dir)
        } else {
            Ok(secrets::list_secrets(hosts))
        }
    }

    /// Run `argv` on every host, best-effort
    pub async fn exec(&self, hosts: &[Host], argv: &[String]) -> Result<(), FleetError> {
        if argv.is_empty() {
            return Err(FleetError::ConfigError("No command specified".to_string()));
        }

        for host in hosts {
            if host.build_only {
                info!("Exec is disabled for build-only host: {}", host.name);
                continue;
            }
            info!("** {}", host.name);
            // failures are reported by run_interactive itself
            let _ = self.shell.run_interactive(host, self.options.timeout, argv).await;
        }

        Ok(())
    }
}
