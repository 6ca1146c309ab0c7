//! Single check execution

use std::time::Duration;

use http::header::HOST;
use reqwest::Client;
use url::Url;

use crate::errors::FleetError;
use crate::models::{CmdHealthCheck, HealthCheck, HttpHealthCheck, Host};
use crate::ssh::RemoteShell;

/// Run one attempt of `check` against `host`
pub async fn run_check(check: &HealthCheck, shell: &dyn RemoteShell, host: &Host) -> Result<(), FleetError> {
    match check {
        HealthCheck::Cmd(check) => run_cmd_check(check, shell, host).await,
        HealthCheck::Http(check) => run_http_check(check, host).await,
    }
}

async fn run_cmd_check(check: &CmdHealthCheck, shell: &dyn RemoteShell, host: &Host) -> Result<(), FleetError> {
    let command = shell
        .command(host, &check.cmd)
        .await
        .map_err(|e| FleetError::CheckError(format!("Health check error: {}", e)))?;

    let timeout = (check.timeout > 0).then(|| Duration::from_secs(check.timeout));
    match command.output(timeout).await {
        Ok(output) if output.success => Ok(()),
        Ok(output) => Err(FleetError::CheckError(format!(
            "Health check error: {}",
            output.combined().trim_end()
        ))),
        Err(e) if e.is_timeout() => Err(FleetError::CheckError(format!(
            "Health check error: Timeout after {}s",
            check.timeout
        ))),
        Err(e) => Err(FleetError::CheckError(format!("Health check error: {}", e))),
    }
}

async fn run_http_check(check: &HttpHealthCheck, host: &Host) -> Result<(), FleetError> {
    // the host override is resolved per attempt, never stored
    let url = Url::parse(&check.url(&host.target_host))
        .map_err(|e| FleetError::CheckError(format!("Invalid health check URL: {}", e)))?;

    let mut builder = Client::builder().danger_accept_invalid_certs(check.insecure_ssl);
    if check.timeout > 0 {
        builder = builder.timeout(Duration::from_secs(check.timeout));
    }
    let client = builder.build()?;

    let mut request = client.get(url);
    for (key, value) in &check.headers {
        if key.eq_ignore_ascii_case("host") {
            request = request.header(HOST, value);
        } else {
            request = request.header(key, value);
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| FleetError::CheckError(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(FleetError::CheckError(format!(
            "Got non 2xx status code ({})",
            status
        )))
    }
}
