//! Health check tests against local commands and a local HTTP server

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use nixfleet::errors::FleetError;
use nixfleet::healthchecks::{perform_checks, perform_health_checks, run_check};
use nixfleet::models::{CmdHealthCheck, HealthCheck, Host, HttpHealthCheck};
use nixfleet::ssh::{RemoteCommand, RemoteShell};

use crate::support::{argv, host, LocalShell};

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { StatusCode::OK }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/vhost",
            get(|headers: HeaderMap| async move {
                match headers.get("host").and_then(|v| v.to_str().ok()) {
                    Some("app.example.test") => StatusCode::NO_CONTENT,
                    _ => StatusCode::NOT_FOUND,
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http_check(addr: SocketAddr, path: &str) -> HttpHealthCheck {
    HttpHealthCheck {
        description: format!("GET {}", path),
        scheme: "http".to_string(),
        host: None,
        port: addr.port(),
        path: path.to_string(),
        headers: BTreeMap::new(),
        insecure_ssl: false,
        period: 1,
        timeout: 2,
    }
}

fn cmd_check(cmd: &[&str], period: u64, timeout: u64) -> HealthCheck {
    HealthCheck::Cmd(CmdHealthCheck {
        description: cmd.join(" "),
        cmd: argv(cmd),
        period,
        timeout,
    })
}

fn shell() -> Arc<dyn RemoteShell> {
    Arc::new(LocalShell::new())
}

#[tokio::test]
async fn test_http_check_uses_host_address() {
    let addr = serve().await;
    let shell = LocalShell::new();

    run_check(&HealthCheck::Http(http_check(addr, "/ok")), &shell, &host("web01"))
        .await
        .unwrap();

    let err = run_check(&HealthCheck::Http(http_check(addr, "/broken")), &shell, &host("web01"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Got non 2xx status code (500"));
}

#[tokio::test]
async fn test_http_check_host_header_selects_virtual_host() {
    let addr = serve().await;
    let shell = LocalShell::new();

    let mut check = http_check(addr, "/vhost");
    assert!(run_check(&HealthCheck::Http(check.clone()), &shell, &host("web01")).await.is_err());

    check
        .headers
        .insert("Host".to_string(), "app.example.test".to_string());
    run_check(&HealthCheck::Http(check), &shell, &host("web01"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_http_check_override_wins_over_host_address() {
    let addr = serve().await;
    let shell = LocalShell::new();

    let mut check = http_check(addr, "/ok");
    check.host = Some("127.0.0.1".to_string());

    // the host's own address is unreachable
    let target = nixfleet::models::Host::new("web01", "192.0.2.1");
    run_check(&HealthCheck::Http(check), &shell, &target).await.unwrap();
}

#[tokio::test]
async fn test_cmd_check_failure_and_timeout() {
    let shell = LocalShell::new();
    let host = host("web01");

    run_check(&cmd_check(&["true"], 1, 5), &shell, &host).await.unwrap();

    let err = run_check(&cmd_check(&["sh", "-c", "echo down; exit 1"], 1, 5), &shell, &host)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Check failed: Health check error: down");

    let err = run_check(&cmd_check(&["sleep", "5"], 1, 1), &shell, &host)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Timeout after 1s"));
}

#[tokio::test]
async fn test_passing_checks_return_promptly() {
    let addr = serve().await;
    let checks = vec![
        cmd_check(&["true"], 5, 5),
        HealthCheck::Http(http_check(addr, "/ok")),
    ];

    let started = Instant::now();
    perform_checks(shell(), &host("web01"), "health checks", checks, 0)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_failing_check_times_out_before_its_period() {
    let checks = vec![cmd_check(&["false"], 5, 5)];

    let started = Instant::now();
    let err = perform_checks(shell(), &host("web01"), "health checks", checks, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::CheckTimeout { seconds: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_check_is_retried_until_it_passes() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ready");
    let script = format!("test -e {0} || {{ touch {0}; exit 1; }}", marker.display());
    let checks = vec![cmd_check(&["sh", "-c", &script], 1, 5)];

    let started = Instant::now();
    perform_checks(shell(), &host("web01"), "pre-deploy checks", checks, 10)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(marker.exists());
}

#[tokio::test]
async fn test_host_without_checks_passes() {
    perform_health_checks(shell(), &host("web01"), 1).await.unwrap();
}

/// Shell whose commands blow up while being built
struct PanickingShell;

#[async_trait]
impl RemoteShell for PanickingShell {
    async fn command(&self, _: &Host, _: &[String]) -> Result<RemoteCommand, FleetError> {
        panic!("no command for you");
    }

    async fn sudo_command(&self, _: &Host, _: &[String]) -> Result<RemoteCommand, FleetError> {
        panic!("no command for you");
    }

    fn upload_command(&self, _: &Host, _: &Path, _: &str) -> RemoteCommand {
        panic!("no upload for you");
    }
}

#[tokio::test]
async fn test_panicking_worker_fails_the_group() {
    let checks = vec![cmd_check(&["true"], 1, 1)];

    let err = perform_checks(Arc::new(PanickingShell), &host("web01"), "health checks", checks, 5)
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::CheckError(_)));
    assert!(err.to_string().contains("health checks of web01"));
}
