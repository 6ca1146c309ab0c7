//! Secret upload tests

use std::path::Path;

use nixfleet::errors::FleetError;
use nixfleet::models::{Host, Owner, Secret, UploadPhase};
use nixfleet::secrets::{upload_secret, upload_secrets};

use crate::support::{host, LocalShell};

fn secret(source: &str, destination: &Path, upload_at: UploadPhase, action: &[&str]) -> Secret {
    Secret {
        source: source.to_string(),
        destination: destination.display().to_string(),
        owner: Owner::default(),
        permissions: "0640".to_string(),
        action: action.iter().map(|a| a.to_string()).collect(),
        mk_dirs: true,
        upload_at,
    }
}

struct Fixture {
    deployment_dir: tempfile::TempDir,
    remote: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let deployment_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(deployment_dir.path().join("secrets")).unwrap();
        std::fs::write(deployment_dir.path().join("secrets/db"), "db-password").unwrap();
        std::fs::write(deployment_dir.path().join("secrets/tls"), "tls-key").unwrap();

        Self {
            deployment_dir,
            remote: tempfile::tempdir().unwrap(),
        }
    }

    fn remote(&self, path: &str) -> std::path::PathBuf {
        self.remote.path().join(path)
    }
}

#[tokio::test]
async fn test_upload_secret_places_file() {
    let fixture = Fixture::new();
    let shell = LocalShell::new().script("chown", "true");
    let destination = fixture.remote("etc/db/password");

    let secret = secret("secrets/db", &destination, UploadPhase::PreActivation, &[]);
    upload_secret(&shell, &host("web01"), &secret, fixture.deployment_dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "db-password");

    let calls = shell.calls();
    assert_eq!(calls[0], "mktemp");
    assert!(calls[1].starts_with(&format!(
        "upload {}",
        fixture.deployment_dir.path().join("secrets/db").display()
    )));
    assert!(calls[2].starts_with("sudo mkdir -p -m 755 "));
    assert!(calls[3].starts_with("sudo mv "));
    assert_eq!(calls[4], format!("sudo chown root:root {}", destination.display()));
    assert_eq!(calls[5], format!("sudo chmod 0640 {}", destination.display()));
}

#[tokio::test]
async fn test_ownership_failure_is_partial() {
    let fixture = Fixture::new();
    let shell = LocalShell::new().script("chown", "echo 'invalid user' >&2; exit 1");
    let destination = fixture.remote("password");

    let secret = secret("secrets/db", &destination, UploadPhase::PreActivation, &[]);
    let err = upload_secret(&shell, &host("web01"), &secret, fixture.deployment_dir.path())
        .await
        .unwrap_err();

    assert!(!err.fatal);
    assert!(err.message.contains("invalid user"));
    assert!(destination.exists());
}

#[tokio::test]
async fn test_failed_move_is_fatal_and_stops_the_host() {
    let fixture = Fixture::new();
    let shell = LocalShell::new()
        .script("chown", "true")
        .script("mv", "exit 1");

    let mut target = host("web01");
    target.secrets.insert(
        "a-db".to_string(),
        secret("secrets/db", &fixture.remote("db"), UploadPhase::PreActivation, &[]),
    );
    target.secrets.insert(
        "b-tls".to_string(),
        secret("secrets/tls", &fixture.remote("tls"), UploadPhase::PreActivation, &[]),
    );

    let err = upload_secrets(&shell, &target, fixture.deployment_dir.path(), None, 5)
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::Secret(ref e) if e.fatal));
    assert_eq!(shell.calls().iter().filter(|c| *c == "mktemp").count(), 1);
}

#[tokio::test]
async fn test_phase_filter_and_deduplicated_actions() {
    let fixture = Fixture::new();
    let shell = LocalShell::new()
        .script("chown", "true")
        .script("systemctl", "true");

    let mut target: Host = host("web01");
    target.secrets.insert(
        "db".to_string(),
        secret("secrets/db", &fixture.remote("db"), UploadPhase::PreActivation, &["systemctl", "reload", "app"]),
    );
    target.secrets.insert(
        "tls".to_string(),
        secret("secrets/tls", &fixture.remote("tls"), UploadPhase::PreActivation, &["systemctl", "reload", "app"]),
    );
    target.secrets.insert(
        "late".to_string(),
        secret("secrets/tls", &fixture.remote("late"), UploadPhase::PostActivation, &[]),
    );

    upload_secrets(
        &shell,
        &target,
        fixture.deployment_dir.path(),
        Some(UploadPhase::PreActivation),
        5,
    )
    .await
    .unwrap();

    assert!(fixture.remote("db").exists());
    assert!(fixture.remote("tls").exists());
    assert!(!fixture.remote("late").exists());

    let calls = shell.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("systemctl")).count(), 1);
}

#[tokio::test]
async fn test_failing_action_does_not_fail_the_upload() {
    let fixture = Fixture::new();
    let shell = LocalShell::new()
        .script("chown", "true")
        .script("restart-app", "exit 3");

    let mut target = host("web01");
    target.secrets.insert(
        "db".to_string(),
        secret("secrets/db", &fixture.remote("db"), UploadPhase::PreActivation, &["restart-app"]),
    );

    upload_secrets(&shell, &target, fixture.deployment_dir.path(), None, 5)
        .await
        .unwrap();
    assert!(shell.calls().contains(&"restart-app".to_string()));
}
