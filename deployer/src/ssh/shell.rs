//! Remote shell abstraction and the primitives built on top of it

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::models::Host;
use crate::ssh::command::RemoteCommand;
use crate::ssh::SSH_DISCONNECT_EXIT_CODE;

/// Deadline for reading the boot id
pub const BOOT_ID_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between boot id polls while waiting for a reboot
pub const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn timeout_from_secs(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Constructs commands for hosts.
///
/// Implementors only build commands; running them and every file or power
/// primitive is shared through the provided methods.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Command running `argv` on `host`, escalated when `argv[0]` is `sudo`
    async fn command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError>;

    /// Command running `argv` on `host` with privilege escalation
    async fn sudo_command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError>;

    /// Command copying a local file to `destination` on `host`
    fn upload_command(&self, host: &Host, source: &Path, destination: &str) -> RemoteCommand;

    /// Run a command with its output mirrored to stderr.
    ///
    /// Callers treat a failure as a diagnostic, not as fatal.
    async fn run_interactive(
        &self,
        host: &Host,
        timeout_secs: u64,
        argv: &[String],
    ) -> Result<(), FleetError> {
        let command = self.command(host, argv).await?;

        let output = match command.output_mirrored(timeout_from_secs(timeout_secs)).await {
            Ok(output) => output,
            Err(e) if e.is_timeout() => {
                warn!("Exec of cmd: {:?} timed out", argv);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !output.success {
            warn!("Exec of cmd: {:?} failed with exit code {:?}", argv, output.code);
            return Err(FleetError::RemoteCommand {
                host: host.name.clone(),
                message: output.combined(),
            });
        }

        Ok(())
    }

    /// Id of the host's current boot
    async fn get_boot_id(&self, host: &Host) -> Result<String, FleetError> {
        let command = self
            .command(host, &to_argv(&["cat", "/proc/sys/kernel/random/boot_id"]))
            .await?;
        let output = command.checked_output(Some(BOOT_ID_TIMEOUT)).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Reboot `host` and wait up to `deadline` for it to come back with a new
    /// boot id. The deadline covers the reboot command as well as the wait.
    async fn reboot(&self, host: &Host, deadline: Duration) -> Result<(), FleetError> {
        let old_boot_id = match self.get_boot_id(host).await {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Unable to read boot id of {}: {}", host.name, e);
                None
            }
        };

        let end = tokio::time::Instant::now() + deadline;

        info!("Asking host {} to reboot ...", host.name);
        let command = self.sudo_command(host, &to_argv(&["reboot"])).await?;

        // the connection dropping or hanging under us is the expected outcome
        match command.output(Some(deadline)).await {
            Ok(output) if !output.success && output.code != Some(SSH_DISCONNECT_EXIT_CODE) => {
                return Err(FleetError::RemoteCommand {
                    host: host.name.clone(),
                    message: format!("Couldn't reboot host:\n{}", output.combined()),
                });
            }
            Ok(_) => {}
            Err(e) if e.is_timeout() => debug!("Reboot command on {} did not return: {}", host.name, e),
            Err(e) => return Err(e),
        }

        let Some(old_boot_id) = old_boot_id else {
            warn!("Boot id of {} unavailable, not waiting for it to come back", host.name);
            return Ok(());
        };

        info!("Waiting for host {} to come online", host.name);
        let wait = async {
            loop {
                tokio::time::sleep(REBOOT_POLL_INTERVAL).await;
                match self.get_boot_id(host).await {
                    Ok(id) if !id.is_empty() && id != old_boot_id => return,
                    Ok(_) => debug!("Host {} still on the old boot", host.name),
                    Err(e) => debug!("Host {} not reachable yet: {}", host.name, e),
                }
            }
        };

        tokio::time::timeout_at(end, wait)
            .await
            .map_err(|_| FleetError::RebootTimeout {
                host: host.name.clone(),
                seconds: deadline.as_secs(),
            })?;

        info!("Host {} is back", host.name);
        Ok(())
    }

    /// Create a temporary file on the host and return its path
    async fn make_temp_file(&self, host: &Host) -> Result<String, FleetError> {
        let command = self.command(host, &to_argv(&["mktemp"])).await?;
        let output = command.output(None).await?;

        if !output.success {
            return Err(FleetError::RemoteCommand {
                host: format!("{} ({})", host.name, host.target_host),
                message: format!(
                    "Couldn't create temporary file using mktemp\n\nOriginal error:\n{}",
                    output.stderr
                ),
            });
        }

        Ok(output.stdout.trim().to_string())
    }

    async fn upload_file(&self, host: &Host, source: &Path, destination: &str) -> Result<(), FleetError> {
        let output = self.upload_command(host, source, destination).output(None).await?;

        if !output.success {
            return Err(FleetError::RemoteCommand {
                host: format!("{} ({})", host.name, host.target_host),
                message: format!(
                    "Couldn't upload file: {} -> {}\n\nOriginal error:\n{}",
                    source.display(),
                    destination,
                    output.combined()
                ),
            });
        }

        Ok(())
    }

    async fn make_dirs(&self, host: &Host, path: &str, parents: bool, mode: u32) -> Result<(), FleetError> {
        let mut argv = to_argv(&["mkdir"]);
        if parents {
            argv.push("-p".to_string());
        }
        argv.push("-m".to_string());
        argv.push(format!("{:o}", mode & 0o7777));
        argv.push(path.to_string());

        sudo_checked(self, host, &argv, &format!("Couldn't make directories: {}", path)).await
    }

    async fn move_file(&self, host: &Host, source: &str, destination: &str) -> Result<(), FleetError> {
        sudo_checked(
            self,
            host,
            &to_argv(&["mv", source, destination]),
            &format!("Couldn't move file: {} -> {}", source, destination),
        )
        .await
    }

    async fn set_owner(&self, host: &Host, path: &str, user: &str, group: &str) -> Result<(), FleetError> {
        sudo_checked(
            self,
            host,
            &to_argv(&["chown", &format!("{}:{}", user, group), path]),
            &format!("Couldn't chown file: {}", path),
        )
        .await
    }

    async fn set_permissions(&self, host: &Host, path: &str, permissions: &str) -> Result<(), FleetError> {
        sudo_checked(
            self,
            host,
            &to_argv(&["chmod", permissions, path]),
            &format!("Couldn't chmod file: {}", path),
        )
        .await
    }
}

async fn sudo_checked<S: RemoteShell + ?Sized>(
    shell: &S,
    host: &Host,
    argv: &[String],
    what: &str,
) -> Result<(), FleetError> {
    let command = shell.sudo_command(host, argv).await?;
    let output = command.output(None).await?;

    if !output.success {
        return Err(FleetError::RemoteCommand {
            host: host.name.clone(),
            message: format!("{}:\n\t{}", what, output.combined()),
        });
    }

    Ok(())
}
