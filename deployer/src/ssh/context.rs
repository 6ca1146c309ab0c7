//! SSH execution context

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::debug;

use crate::app::options::SshOptions;
use crate::errors::FleetError;
use crate::models::Host;
use crate::ssh::command::RemoteCommand;
use crate::ssh::shell::RemoteShell;
use crate::ssh::SUDO;

/// Source of the remote sudo password
pub trait PasswordPrompt: Send + Sync {
    fn prompt(&self) -> Result<SecretString, FleetError>;
}

/// Asks on the controlling terminal with echo disabled
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self) -> Result<SecretString, FleetError> {
        // dialoguer restores the terminal state on every exit path
        let password = dialoguer::Password::new()
            .with_prompt("Please enter remote sudo password")
            .allow_empty_password(true)
            .report(false)
            .interact()
            .map_err(|e| FleetError::ConfigError(format!("Unable to read sudo password: {}", e)))?;
        Ok(SecretString::from(password))
    }
}

/// Builds ssh/scp invocations for hosts.
///
/// Holds the sudo password once it has been asked for; every later sudo
/// command of this context reuses it.
pub struct SshContext {
    options: SshOptions,
    sudo_password: Mutex<Option<SecretString>>,
    prompt: Arc<dyn PasswordPrompt>,
    ssh_program: String,
    scp_program: String,
}

impl SshContext {
    pub fn new(options: SshOptions) -> Self {
        Self::with_prompt(options, Arc::new(TerminalPrompt))
    }

    pub fn with_prompt(options: SshOptions, prompt: Arc<dyn PasswordPrompt>) -> Self {
        Self {
            options,
            sudo_password: Mutex::new(None),
            prompt,
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Forget the cached sudo password
    pub async fn clear_sudo_password(&self) {
        *self.sudo_password.lock().await = None;
    }

    /// `user@` prefix for a host, if any user is known
    pub fn user_for(&self, host: &Host) -> Option<String> {
        host.target_user
            .clone()
            .or_else(|| self.options.default_username.clone())
    }

    fn common_args(&self, port_flag: &str, host: &Host) -> Vec<String> {
        let mut args = Vec::new();

        if self.options.skip_host_key_check {
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=No".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ]);
        }
        if let Some(identity_file) = &self.options.identity_file {
            args.extend(["-i".to_string(), identity_file.clone()]);
        }
        if let Some(config_file) = &self.options.config_file {
            args.extend(["-F".to_string(), config_file.clone()]);
        }
        if let Some(port) = host.target_port {
            args.extend([port_flag.to_string(), port.to_string()]);
        }

        args
    }

    fn destination(&self, host: &Host) -> String {
        match self.user_for(host) {
            Some(user) => format!("{}@{}", user, host.target_host),
            None => host.target_host.clone(),
        }
    }

    fn ssh_args(&self, host: &Host) -> Vec<String> {
        let mut args = self.common_args("-p", host);
        args.push(self.destination(host));
        args
    }

    /// Cached password, asking for it first if configured to and not yet known
    async fn sudo_password(&self) -> Result<Option<SecretString>, FleetError> {
        let mut cached = self.sudo_password.lock().await;

        if cached.is_none() && self.options.ask_for_sudo_password {
            let prompt = self.prompt.clone();
            let password = tokio::task::spawn_blocking(move || prompt.prompt())
                .await
                .map_err(|e| FleetError::Internal(e.to_string()))??;
            *cached = Some(password);
        }

        Ok(cached.clone())
    }
}

fn validate(argv: &[String]) -> Result<(), FleetError> {
    if argv.is_empty() {
        return Err(FleetError::ConfigError("No command specified".to_string()));
    }
    Ok(())
}

#[async_trait]
impl RemoteShell for SshContext {
    async fn command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError> {
        validate(argv)?;

        if argv[0] == SUDO {
            return self.sudo_command(host, argv).await;
        }

        let mut args = self.ssh_args(host);
        args.extend(argv.iter().cloned());

        Ok(RemoteCommand::new(&host.name, &self.ssh_program, args))
    }

    async fn sudo_command(&self, host: &Host, argv: &[String]) -> Result<RemoteCommand, FleetError> {
        validate(argv)?;

        let argv = if argv[0] == SUDO { &argv[1..] } else { argv };
        validate(argv)?;

        let password = self.sudo_password().await?;

        let mut args = self.ssh_args(host);
        args.push(SUDO.to_string());
        // without a password sudo must fail instead of prompting on the remote side
        args.push(if password.is_some() { "-S" } else { "-n" }.to_string());
        args.extend(["-p", "''", "-k", "--"].map(String::from));
        args.extend(argv.iter().cloned());

        let command = RemoteCommand::new(&host.name, &self.ssh_program, args);
        debug!("Built sudo command for {} (password: {})", host.name, password.is_some());

        Ok(match password {
            Some(password) => command.with_stdin_secret(password),
            None => command,
        })
    }

    fn upload_command(&self, host: &Host, source: &Path, destination: &str) -> RemoteCommand {
        let mut args = self.common_args("-P", host);
        args.push(source.display().to_string());
        args.push(format!("{}:{}", self.destination(host), destination));

        RemoteCommand::new(&host.name, &self.scp_program, args)
    }
}
