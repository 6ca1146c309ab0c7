//! Secret descriptors

use std::fmt;

use serde::{Deserialize, Serialize};

/// When a secret is placed during a deploy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadPhase {
    #[default]
    PreActivation,
    PostActivation,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPhase::PreActivation => write!(f, "pre-activation"),
            UploadPhase::PostActivation => write!(f, "post-activation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default = "default_root")]
    pub user: String,

    #[serde(default = "default_root")]
    pub group: String,
}

impl Default for Owner {
    fn default() -> Self {
        Self {
            user: default_root(),
            group: default_root(),
        }
    }
}

fn default_root() -> String {
    "root".to_string()
}

fn default_permissions() -> String {
    "0400".to_string()
}

/// A file copied from the deploying machine onto a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// Local path, relative paths resolve against the deployment file
    pub source: String,

    pub destination: String,

    #[serde(default)]
    pub owner: Owner,

    #[serde(default = "default_permissions")]
    pub permissions: String,

    /// Command run on the host once all secrets are uploaded
    #[serde(default)]
    pub action: Vec<String>,

    /// Create missing parent directories of the destination
    #[serde(default)]
    pub mk_dirs: bool,

    #[serde(default)]
    pub upload_at: UploadPhase,
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` -> `{}`, with:\n\tPermissions: {}:{}, {}\n\tCreate remote directories: {}",
            self.source,
            self.destination,
            self.owner.user,
            self.owner.group,
            self.permissions,
            self.mk_dirs
        )?;
        if !self.action.is_empty() {
            write!(f, "\n\tAction: `{}`", self.action.join(" "))?;
        }
        Ok(())
    }
}
