//! Error types for nixfleet

use thiserror::Error;

/// Main error type for nixfleet
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Selection error: {0}")]
    SelectionError(String),

    #[error("Error on remote host {host}: {message}")]
    RemoteCommand { host: String, message: String },

    #[error("Timeout: {what} did not complete within {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("Timeout: gave up waiting for {label} to complete after {seconds} seconds")]
    CheckTimeout { label: String, seconds: u64 },

    #[error("Timeout: reboot of {host} was not confirmed within {seconds} seconds")]
    RebootTimeout { host: String, seconds: u64 },

    #[error("Check failed: {0}")]
    CheckError(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Plan error: {0}")]
    PlanError(String),

    #[error("Activation error: {0}")]
    ActivationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}

impl FleetError {
    /// Whether this error is one of the deadline variants
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FleetError::Timeout { .. }
                | FleetError::CheckTimeout { .. }
                | FleetError::RebootTimeout { .. }
        )
    }
}

/// Failure while placing a secret on a host.
///
/// Upload and move failures are fatal; ownership and permission failures
/// after a successful move are partial and leave the remaining secrets to
/// be processed.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SecretError {
    pub fatal: bool,
    pub message: String,
}

impl SecretError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            message: message.into(),
        }
    }

    pub fn partial(message: impl Into<String>) -> Self {
        Self {
            fatal: false,
            message: message.into(),
        }
    }
}
