//! Remote shell primitive tests, run against the local machine

use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};

use nixfleet::errors::FleetError;
use nixfleet::ssh::RemoteShell;

use crate::support::{argv, host, LocalShell};

fn boot_id_shell(boot_file: &std::path::Path, reboot_script: String) -> LocalShell {
    let boot_file = boot_file.display().to_string();
    LocalShell::new()
        .rewrite(move |argv| {
            (argv.first().map(String::as_str) == Some("cat")).then(|| vec!["cat".to_string(), boot_file.clone()])
        })
        .script("reboot", reboot_script)
}

#[tokio::test]
async fn test_get_boot_id() {
    let dir = tempfile::tempdir().unwrap();
    let boot_file = dir.path().join("boot_id");
    std::fs::write(&boot_file, "1111-aaaa\n").unwrap();

    let shell = boot_id_shell(&boot_file, "true".to_string());
    assert_eq!(shell.get_boot_id(&host("web01")).await.unwrap(), "1111-aaaa");
    assert_eq!(shell.calls(), vec!["cat /proc/sys/kernel/random/boot_id"]);
}

#[tokio::test]
async fn test_reboot_waits_for_new_boot_id() {
    let dir = tempfile::tempdir().unwrap();
    let boot_file = dir.path().join("boot_id");
    std::fs::write(&boot_file, "1111-aaaa\n").unwrap();

    // the connection drops while rebooting
    let script = format!("echo 2222-bbbb > {}; exit 255", boot_file.display());
    let shell = boot_id_shell(&boot_file, script);

    assert_ok!(shell.reboot(&host("web01"), Duration::from_secs(20)).await);

    assert!(shell.calls().contains(&"sudo reboot".to_string()));
    assert_eq!(std::fs::read_to_string(&boot_file).unwrap().trim(), "2222-bbbb");
}

#[tokio::test]
async fn test_reboot_confirmation_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let boot_file = dir.path().join("boot_id");
    std::fs::write(&boot_file, "1111-aaaa\n").unwrap();

    let shell = boot_id_shell(&boot_file, "exit 255".to_string());

    let started = Instant::now();
    let err = assert_err!(shell.reboot(&host("web01"), Duration::from_secs(1)).await);

    assert!(matches!(err, FleetError::RebootTimeout { ref host, .. } if host == "web01"));
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_hanging_reboot_command_counts_against_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let boot_file = dir.path().join("boot_id");
    std::fs::write(&boot_file, "1111-aaaa\n").unwrap();

    // the session never closes while the host goes down
    let shell = boot_id_shell(&boot_file, "sleep 8; exit 255".to_string());

    let started = Instant::now();
    let err = assert_err!(shell.reboot(&host("web01"), Duration::from_secs(1)).await);

    assert!(matches!(err, FleetError::RebootTimeout { seconds: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_failed_reboot_command_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let boot_file = dir.path().join("boot_id");
    std::fs::write(&boot_file, "1111-aaaa\n").unwrap();

    let shell = boot_id_shell(&boot_file, "echo not allowed >&2; exit 1".to_string());

    let err = shell
        .reboot(&host("web01"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not allowed"));
}

#[tokio::test]
async fn test_reboot_without_boot_id_does_not_wait() {
    let shell = LocalShell::new()
        .script("cat", "exit 1")
        .script("reboot", "exit 255");

    let started = Instant::now();
    assert_ok!(shell.reboot(&host("web01"), Duration::from_secs(60)).await);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_file_primitives() {
    let dir = tempfile::tempdir().unwrap();
    let shell = LocalShell::new().script("chown", "true");
    let host = host("web01");

    let source = dir.path().join("source");
    std::fs::write(&source, "payload").unwrap();

    let temp = shell.make_temp_file(&host).await.unwrap();
    shell.upload_file(&host, &source, &temp).await.unwrap();

    let target_dir = dir.path().join("a/b");
    let target_dir = target_dir.display().to_string();
    shell.make_dirs(&host, &target_dir, true, 0o755).await.unwrap();

    let destination = format!("{}/secret", target_dir);
    shell.move_file(&host, &temp, &destination).await.unwrap();
    shell.set_owner(&host, &destination, "nginx", "www").await.unwrap();
    shell.set_permissions(&host, &destination, "0600").await.unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "payload");
    assert!(!std::path::Path::new(&temp).exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&destination).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let calls = shell.calls();
    assert!(calls.contains(&format!("sudo mkdir -p -m 755 {}", target_dir)));
    assert!(calls.contains(&format!("sudo mv {} {}", temp, destination)));
    assert!(calls.contains(&format!("sudo chown nginx:www {}", destination)));
    assert!(calls.contains(&format!("sudo chmod 0600 {}", destination)));
}

#[tokio::test]
async fn test_failed_primitive_carries_remote_output() {
    let shell = LocalShell::new();

    let err = shell
        .move_file(&host("web01"), "/nonexistent/source", "/nonexistent/target")
        .await
        .unwrap_err();

    match err {
        FleetError::RemoteCommand { host, message } => {
            assert_eq!(host, "web01");
            assert!(message.starts_with("Couldn't move file: /nonexistent/source -> /nonexistent/target"));
            assert!(message.contains("nonexistent"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_run_interactive_reports_timeout_distinctly() {
    let shell = LocalShell::new();
    let host = host("web01");

    let err = shell
        .run_interactive(&host, 1, &argv(&["sleep", "5"]))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let err = shell
        .run_interactive(&host, 5, &argv(&["sh", "-c", "echo boom; exit 2"]))
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.to_string().contains("boom"));

    shell.run_interactive(&host, 0, &argv(&["true"])).await.unwrap();
}
