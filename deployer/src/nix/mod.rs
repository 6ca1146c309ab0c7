//! Nix builder and closure transfer collaborators

pub mod context;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::FleetError;
use crate::models::Host;

pub use context::NixContext;

/// Builds the closures of a set of hosts
#[async_trait]
pub trait NixBuilder: Send + Sync {
    /// Build `host_names` of the deployment and return the result path,
    /// which holds one entry per host name
    async fn build(&self, deployment: &Path, host_names: &[String]) -> Result<PathBuf, FleetError>;

    /// Store path of one host's closure inside a build result
    async fn resolve_closure(&self, result: &Path, host_name: &str) -> Result<String, FleetError> {
        let link = result.join(host_name);
        let target = tokio::fs::read_link(&link).await.map_err(|e| {
            FleetError::BuildError(format!(
                "No closure for {} in {}: {}",
                host_name,
                result.display(),
                e
            ))
        })?;
        Ok(target.display().to_string())
    }
}

/// Copies a closure to a host
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn copy(&self, path: &str, host: &Host) -> Result<(), FleetError>;
}
