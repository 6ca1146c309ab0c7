//! Secret placement on hosts

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::errors::{FleetError, SecretError};
use crate::models::{Host, Secret, UploadPhase};
use crate::ssh::RemoteShell;

/// Mode of directories created for a secret's destination
const SECRET_DIR_MODE: u32 = 0o755;

/// Local path of a secret, relative sources resolving against `deployment_dir`
pub fn resolve_source(secret: &Secret, deployment_dir: &Path) -> PathBuf {
    let source = Path::new(&secret.source);
    if source.is_absolute() {
        source.to_path_buf()
    } else {
        deployment_dir.join(source)
    }
}

/// Size in bytes of a secret's local source
pub fn secret_size(secret: &Secret, deployment_dir: &Path) -> Result<u64, FleetError> {
    Ok(std::fs::metadata(resolve_source(secret, deployment_dir))?.len())
}

/// Place one secret on `host`.
///
/// The file goes to a temporary path first and is then moved into place, so
/// the destination never holds a partial upload.
pub async fn upload_secret(
    shell: &dyn RemoteShell,
    host: &Host,
    secret: &Secret,
    deployment_dir: &Path,
) -> Result<(), SecretError> {
    let fatal = |e: FleetError| SecretError::fatal(e.to_string());

    let temp_path = shell.make_temp_file(host).await.map_err(fatal)?;

    shell
        .upload_file(host, &resolve_source(secret, deployment_dir), &temp_path)
        .await
        .map_err(fatal)?;

    if secret.mk_dirs {
        if let Some(parent) = Path::new(&secret.destination).parent() {
            let parent = parent.display().to_string();
            if !parent.is_empty() {
                shell
                    .make_dirs(host, &parent, true, SECRET_DIR_MODE)
                    .await
                    .map_err(fatal)?;
            }
        }
    }

    shell
        .move_file(host, &temp_path, &secret.destination)
        .await
        .map_err(fatal)?;

    shell
        .set_owner(host, &secret.destination, &secret.owner.user, &secret.owner.group)
        .await
        .map_err(|e| SecretError::partial(e.to_string()))?;

    shell
        .set_permissions(host, &secret.destination, &secret.permissions)
        .await
        .map_err(|e| SecretError::partial(e.to_string()))?;

    Ok(())
}

/// Upload the secrets of `host` belonging to `phase` (every secret when
/// `None`), then run each distinct post-upload action once.
///
/// A fatal secret failure stops the host's remaining secrets. Post-upload
/// actions are best-effort.
pub async fn upload_secrets(
    shell: &dyn RemoteShell,
    host: &Host,
    deployment_dir: &Path,
    phase: Option<UploadPhase>,
    timeout_secs: u64,
) -> Result<(), FleetError> {
    info!("Uploading secrets to {} ({}):", host.name, host.target_host);

    let mut actions: IndexMap<String, Vec<String>> = IndexMap::new();

    for (name, secret) in &host.secrets {
        if phase.is_some_and(|phase| secret.upload_at != phase) {
            continue;
        }

        let size = secret_size(secret, deployment_dir)?;

        match upload_secret(shell, host, secret, deployment_dir).await {
            Ok(()) => info!("\t* {} ({} bytes).. OK", name, size),
            Err(e) if e.fatal => {
                error!("\t* {} ({} bytes).. Failed", name, size);
                return Err(e.into());
            }
            Err(e) => warn!("\t* {} ({} bytes).. Partial\n{}", name, size, e),
        }

        if !secret.action.is_empty() {
            actions
                .entry(secret.action.join(" "))
                .or_insert_with(|| secret.action.clone());
        }
    }

    for (line, action) in actions {
        info!("\t- executing post-upload command: {}", line);
        if let Err(e) = shell.run_interactive(host, timeout_secs, &action).await {
            warn!("Post-upload command on {} failed: {}", host.name, e);
        }
    }

    Ok(())
}

/// Human readable listing of every host's secrets
pub fn list_secrets(hosts: &[Host]) -> String {
    let mut out = String::new();
    for host in hosts.iter().filter(|h| !h.secrets.is_empty()) {
        let _ = writeln!(out, "Secrets for host {}:", host.name);
        for (name, secret) in &host.secrets {
            let _ = writeln!(out, "{}:\n\t{}", name, secret);
        }
        out.push('\n');
    }
    out
}

/// `{host: {name: secret}}` with sources made absolute
pub fn list_secrets_json(hosts: &[Host], deployment_dir: &Path) -> Result<String, FleetError> {
    let by_host: BTreeMap<&str, BTreeMap<&str, Secret>> = hosts
        .iter()
        .map(|host| {
            let secrets = host
                .secrets
                .iter()
                .map(|(name, secret)| {
                    let mut secret = secret.clone();
                    secret.source = resolve_source(&secret, deployment_dir).display().to_string();
                    (name.as_str(), secret)
                })
                .collect();
            (host.name.as_str(), secrets)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&by_host)?)
}
