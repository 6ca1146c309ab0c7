//! Deployment models

pub mod checks;
pub mod host;
pub mod secret;

pub use checks::{CmdHealthCheck, HealthCheck, HealthChecks, HttpHealthCheck};
pub use host::{Deployment, DeploymentMeta, Host, HostOrdering};
pub use secret::{Owner, Secret, UploadPhase};
