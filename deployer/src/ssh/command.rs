//! A constructed command, ready to be run against one host

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::errors::FleetError;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Local process invocation (ssh, scp or a stand-in) targeting a host.
///
/// A sudo password, when attached, is written to the process' stdin and
/// never appears in its arguments or environment.
pub struct RemoteCommand {
    host: String,
    program: String,
    args: Vec<String>,
    stdin_secret: Option<SecretString>,
}

impl RemoteCommand {
    pub fn new(host: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            host: host.into(),
            program: program.into(),
            args,
            stdin_secret: None,
        }
    }

    /// Feed `secret` followed by a newline to the command's stdin
    pub fn with_stdin_secret(mut self, secret: SecretString) -> Self {
        self.stdin_secret = Some(secret);
        self
    }

    /// Name of the host the command targets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn has_stdin_secret(&self) -> bool {
        self.stdin_secret.is_some()
    }

    fn spawn(&self) -> Result<Child, FleetError> {
        debug!("Spawning on {}: {}", self.host, self);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.stdin_secret.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        Ok(command.spawn()?)
    }

    async fn feed_stdin(&self, child: &mut Child) -> Result<(), FleetError> {
        let (Some(secret), Some(mut stdin)) = (&self.stdin_secret, child.stdin.take()) else {
            return Ok(());
        };

        let payload = format!("{}\n", secret.expose_secret());
        match stdin.write_all(payload.as_bytes()).await {
            // the command may exit before reading its input
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(()),
        }
    }

    fn timeout_error(&self, limit: Duration) -> FleetError {
        FleetError::Timeout {
            what: format!("command on {}: {}", self.host, self),
            seconds: limit.as_secs(),
        }
    }

    /// Run to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; an elapsed `timeout` is.
    pub async fn output(&self, timeout: Option<Duration>) -> Result<CommandOutput, FleetError> {
        let mut child = self.spawn()?;
        self.feed_stdin(&mut child).await?;

        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| self.timeout_error(limit))??,
            None => wait.await?,
        };

        Ok(output.into())
    }

    /// Run to completion, copying output line by line to stderr while also
    /// capturing it
    pub async fn output_mirrored(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, FleetError> {
        let mut child = self.spawn()?;
        self.feed_stdin(&mut child).await?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (stdout, stderr, status) = tokio::join!(mirror(stdout), mirror(stderr), child.wait());
            let status = status?;
            Ok::<_, FleetError>(CommandOutput {
                code: status.code(),
                success: status.success(),
                stdout: stdout?,
                stderr: stderr?,
            })
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| self.timeout_error(limit))?,
            None => run.await,
        }
    }

    /// Run and fail with the combined output on a non-zero exit
    pub async fn checked_output(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, FleetError> {
        let output = self.output(timeout).await?;
        if output.success {
            Ok(output)
        } else {
            Err(FleetError::RemoteCommand {
                host: self.host.clone(),
                message: output.combined(),
            })
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("host", &self.host)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin_secret", &self.stdin_secret.is_some())
            .finish()
    }
}

async fn mirror<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<String, FleetError> {
    let mut collected = String::new();
    if let Some(reader) = reader {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            eprintln!("{}", line);
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    Ok(collected)
}
