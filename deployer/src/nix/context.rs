//! Nix command line adapter

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::app::options::{NixOptions, SshOptions};
use crate::errors::FleetError;
use crate::models::{Deployment, Host};
use crate::nix::{NixBuilder, Transfer};

/// Runs `nix eval`, `nix-build` and `nix copy`
pub struct NixContext {
    options: NixOptions,
    ssh: SshOptions,
}

impl NixContext {
    pub fn new(options: NixOptions, ssh: SshOptions) -> Self {
        Self { options, ssh }
    }

    fn trace_args(&self) -> Vec<String> {
        if self.options.show_trace {
            vec!["--show-trace".to_string()]
        } else {
            Vec::new()
        }
    }

    /// Evaluate the deployment file into its hosts and metadata
    pub async fn get_machines(&self, deployment: &Path) -> Result<Deployment, FleetError> {
        let mut command = Command::new("nix");
        command
            .arg("eval")
            .arg("-f")
            .arg(&self.options.eval_machines)
            .arg("info.deployment")
            .arg("--arg")
            .arg("networkExpr")
            .arg(deployment)
            .arg("--json")
            .args(self.trace_args())
            .stderr(Stdio::inherit());

        debug!("Evaluating deployment {}", deployment.display());
        let output = command
            .output()
            .await
            .map_err(|e| FleetError::BuildError(format!("Failed to run nix eval: {}", e)))?;

        if !output.status.success() {
            return Err(FleetError::BuildError(
                "Error while running `nix eval ..`: See above.".to_string(),
            ));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// `ssh://` store URI for a host
    pub fn store_uri(&self, host: &Host) -> String {
        let user = host
            .target_user
            .as_ref()
            .or(self.ssh.default_username.as_ref())
            .map(|user| format!("{}@", user))
            .unwrap_or_default();
        let key = self
            .ssh
            .identity_file
            .as_ref()
            .map(|file| format!("?ssh-key={}", file))
            .unwrap_or_default();

        format!("ssh://{}{}{}", user, host.target_host, key)
    }

    /// Options nix passes on to ssh when copying
    pub fn ssh_opts(&self, host: &Host) -> Vec<String> {
        let mut opts = Vec::new();
        if let Some(port) = host.target_port {
            opts.push(format!("-p {}", port));
        }
        if let Some(config_file) = &self.ssh.config_file {
            opts.push(format!("-F {}", config_file));
        }
        if self.ssh.skip_host_key_check {
            opts.push("-o StrictHostKeyChecking=No -o UserKnownHostsFile=/dev/null".to_string());
        }
        opts
    }
}

#[async_trait]
impl NixBuilder for NixContext {
    async fn build(&self, deployment: &Path, host_names: &[String]) -> Result<PathBuf, FleetError> {
        if host_names.is_empty() {
            return Err(FleetError::BuildError("No hosts selected".to_string()));
        }

        let names = format!(
            "[{}]",
            host_names
                .iter()
                .map(|name| format!("\"{}\"", name))
                .collect::<Vec<_>>()
                .join(" ")
        );

        // removed with the guard on every path out of this function
        let result_dir = tempfile::Builder::new().prefix("nixfleet-").tempdir()?;
        let result_link = result_dir.path().join("result");

        let status = Command::new("nix-build")
            .arg(&self.options.eval_machines)
            .args(["-A", "machines", "--arg", "networkExpr"])
            .arg(deployment)
            .args(["--arg", "names", names.as_str(), "--out-link"])
            .arg(&result_link)
            .args(self.trace_args())
            .args(&self.options.build_args)
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| FleetError::BuildError(format!("Failed to run nix-build: {}", e)))?;

        if !status.success() {
            return Err(FleetError::BuildError(
                "Error while running `nix-build ...`: See above.".to_string(),
            ));
        }

        let result = tokio::fs::read_link(&result_link).await?;
        info!("nix result path: {}", result.display());
        Ok(result)
    }
}

#[async_trait]
impl Transfer for NixContext {
    async fn copy(&self, path: &str, host: &Host) -> Result<(), FleetError> {
        let mut command = Command::new("nix");
        command.arg("copy");
        if host.substitute_on_destination {
            command.arg("--substitute-on-destination");
        }
        command
            .arg(path)
            .arg("--to")
            .arg(self.store_uri(host))
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit());

        let ssh_opts = self.ssh_opts(host);
        if !ssh_opts.is_empty() {
            command.env("NIX_SSHOPTS", ssh_opts.join(" "));
        }

        let status = command
            .status()
            .await
            .map_err(|e| FleetError::TransferError(format!("Failed to run nix copy: {}", e)))?;

        if !status.success() {
            return Err(FleetError::TransferError(format!(
                "Copying {} to {} failed",
                path, host.name
            )));
        }

        Ok(())
    }
}
