//! Configuration activation

use tracing::info;

use crate::app::options::SwitchAction;
use crate::errors::FleetError;
use crate::models::Host;
use crate::ssh::RemoteShell;

/// Profile holding the host's system generations
pub const SYSTEM_PROFILE: &str = "/nix/var/nix/profiles/system";

/// Make `closure` the running (or next boot's) configuration of `host`
pub async fn activate(
    shell: &dyn RemoteShell,
    host: &Host,
    closure: &str,
    action: SwitchAction,
) -> Result<(), FleetError> {
    info!("Executing '{}' on matched hosts:", action);
    info!("** {}", host.name);

    if action.sets_profile() {
        let argv = ["nix-env", "--profile", SYSTEM_PROFILE, "--set", closure].map(String::from);
        let output = shell.sudo_command(host, &argv).await?.output_mirrored(None).await?;
        if !output.success {
            return Err(FleetError::ActivationError(format!(
                "Setting the system profile of {} failed",
                host.name
            )));
        }
    }

    let argv = [
        format!("{}/bin/switch-to-configuration", closure.trim_end_matches('/')),
        action.to_string(),
    ];
    let output = shell.sudo_command(host, &argv).await?.output_mirrored(None).await?;
    if !output.success {
        return Err(FleetError::ActivationError(
            "Error while activating new configuration.".to_string(),
        ));
    }

    Ok(())
}
