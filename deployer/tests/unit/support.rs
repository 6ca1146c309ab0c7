//! Shared test helpers

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use nixfleet::errors::FleetError;
use nixfleet::models::Host;
use nixfleet::ssh::{RemoteCommand, RemoteShell};

type Rewrite = dyn Fn(&[String]) -> Option<Vec<String>> + Send + Sync;

/// Runs "remote" commands on the local machine.
///
/// Every command line is recorded, sudo ones prefixed with `sudo`. Rewrites
/// replace matching argvs before they run, which lets tests stand in for
/// files like the boot id.
#[derive(Default)]
pub struct LocalShell {
    rewrites: Vec<Box<Rewrite>>,
    calls: Mutex<Vec<String>>,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rewrite<F>(mut self, rewrite: F) -> Self
    where
        F: Fn(&[String]) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        self.rewrites.push(Box::new(rewrite));
        self
    }

    /// Run `script` with `sh -c` whenever argv[0] is `program`
    pub fn script(self, program: &'static str, script: impl Into<String>) -> Self {
        let script = script.into();
        self.rewrite(move |argv| {
            (argv.first().map(String::as_str) == Some(program)).then(|| sh(&script))
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn build(&self, host: &Host, argv: &[String], sudo: bool) -> RemoteCommand {
        let line = argv.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push(if sudo { format!("sudo {}", line) } else { line });

        let argv = self
            .rewrites
            .iter()
            .find_map(|rewrite| rewrite(argv))
            .unwrap_or_else(|| argv.to_vec());

        let mut args = vec!["-c".to_string(), "\"$@\"".to_string(), "sh".to_string()];
        args.extend(argv);
        RemoteCommand::new(&host.name, "sh", args)
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    async fn command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError> {
        if argv.is_empty() {
            return Err(FleetError::ConfigError("No command specified".to_string()));
        }
        if argv[0] == "sudo" {
            return self.sudo_command(host, argv).await;
        }
        Ok(self.build(host, argv, false))
    }

    async fn sudo_command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError> {
        let argv = if argv.first().map(String::as_str) == Some("sudo") {
            &argv[1..]
        } else {
            argv
        };
        if argv.is_empty() {
            return Err(FleetError::ConfigError("No command specified".to_string()));
        }
        Ok(self.build(host, argv, true))
    }

    fn upload_command(&self, host: &Host, source: &Path, destination: &str) -> RemoteCommand {
        self.calls
            .lock()
            .unwrap()
            .push(format!("upload {} {}", source.display(), destination));
        RemoteCommand::new(
            &host.name,
            "cp",
            vec![source.display().to_string(), destination.to_string()],
        )
    }
}

pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

pub fn host(name: &str) -> Host {
    Host::new(name, "127.0.0.1")
}
