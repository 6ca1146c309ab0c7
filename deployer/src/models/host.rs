//! Host models produced by deployment evaluation

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::checks::HealthChecks;
use crate::models::secret::Secret;

/// A single deployment target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Unique name within the deployment
    pub name: String,

    /// Address used to reach the host over SSH
    pub target_host: String,

    /// SSH port, when not the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,

    /// SSH user, when not the context default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user: Option<String>,

    /// Labels used for selection and ordering
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Host is built but never pushed to or activated
    #[serde(default)]
    pub build_only: bool,

    /// Let the destination fetch paths from its own substituters
    #[serde(default)]
    pub substitute_on_destination: bool,

    /// Backend specific key/value options
    #[serde(default)]
    pub nix_config: BTreeMap<String, String>,

    #[serde(default)]
    pub secrets: BTreeMap<String, Secret>,

    /// Checks run after activation
    #[serde(default)]
    pub health_checks: HealthChecks,

    /// Checks run before activation
    #[serde(default)]
    pub pre_deploy_checks: HealthChecks,
}

impl Host {
    /// Create a host with only its identity set
    pub fn new(name: impl Into<String>, target_host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_host: target_host.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// One line summary used when reporting the selected hosts
    pub fn summary(&self) -> String {
        format!(
            "{} (secrets: {}, health checks: {}, tags: {})",
            self.name,
            self.secrets.len(),
            self.health_checks.len(),
            self.tags.iter().cloned().collect::<Vec<_>>().join(","),
        )
    }
}

/// Default ordering of a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostOrdering {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Deployment wide metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMeta {
    #[serde(default)]
    pub ordering: HostOrdering,
}

/// Evaluated deployment: every host plus deployment metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub meta: DeploymentMeta,
}
