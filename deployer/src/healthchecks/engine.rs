//! Concurrent retry-until-success check groups

use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::FleetError;
use crate::healthchecks::check::run_check;
use crate::models::{HealthCheck, Host};
use crate::ssh::RemoteShell;

/// Run a named group of checks against `host`.
///
/// Every check gets its own worker retrying it every `period` seconds until
/// it passes. The group succeeds once all workers are done and fails when
/// `timeout_secs` (0 = unbounded) elapses first; outstanding workers are then
/// told to stop.
pub async fn perform_checks(
    shell: Arc<dyn RemoteShell>,
    host: &Host,
    label: &str,
    checks: Vec<HealthCheck>,
    timeout_secs: u64,
) -> Result<(), FleetError> {
    if checks.is_empty() {
        return Ok(());
    }

    info!("Running {} on {}:", label, host.name);

    let (cancel_tx, _) = broadcast::channel::<()>(1);
    let started = Instant::now();

    let workers: Vec<_> = checks
        .into_iter()
        .map(|check| {
            let shell = shell.clone();
            let host = host.clone();
            let cancel_rx = cancel_tx.subscribe();
            tokio::spawn(async move {
                run_until_success(check, shell, host, cancel_rx).await;
            })
        })
        .collect();

    let deadline = async {
        if timeout_secs > 0 {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        results = join_all(workers) => {
            match results.into_iter().find_map(Result::err) {
                Some(e) => Err(FleetError::CheckError(format!(
                    "{} of {} did not finish: {}",
                    label, host.name, e
                ))),
                None => {
                    info!("{} OK", capitalize(label));
                    Ok(())
                }
            }
        }
        _ = deadline => {
            let _ = cancel_tx.send(());
            warn!(
                "Timeout: Gave up waiting for {} to complete after {} seconds",
                label,
                started.elapsed().as_secs()
            );
            Err(FleetError::CheckTimeout {
                label: label.to_string(),
                seconds: timeout_secs,
            })
        }
    }
}

/// Post-activation health checks of `host`
pub async fn perform_health_checks(
    shell: Arc<dyn RemoteShell>,
    host: &Host,
    timeout_secs: u64,
) -> Result<(), FleetError> {
    let checks = host.health_checks.all();
    perform_checks(shell, host, "health checks", checks, timeout_secs).await
}

/// Checks that must pass before `host` is activated
pub async fn perform_pre_deploy_checks(
    shell: Arc<dyn RemoteShell>,
    host: &Host,
    timeout_secs: u64,
) -> Result<(), FleetError> {
    let checks = host.pre_deploy_checks.all();
    perform_checks(shell, host, "pre-deploy checks", checks, timeout_secs).await
}

async fn run_until_success(
    check: HealthCheck,
    shell: Arc<dyn RemoteShell>,
    host: Host,
    mut cancel_rx: broadcast::Receiver<()>,
) {
    loop {
        let result = tokio::select! {
            _ = cancel_rx.recv() => return,
            result = run_check(&check, shell.as_ref(), &host) => result,
        };

        match result {
            Ok(()) => {
                info!("\t* {}: {}", check.description(), "OK".green());
                return;
            }
            Err(e) => {
                warn!("\t* {}: {} ({})", check.description(), "Failed".red(), e);
            }
        }

        tokio::select! {
            _ = cancel_rx.recv() => return,
            _ = tokio::time::sleep(Duration::from_secs(check.period())) => {}
        }
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
