//! Application configuration options

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Remote shell settings, read once when the execution context is built
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    /// User for hosts that do not declare one
    pub default_username: Option<String>,

    /// Private key passed to ssh/scp/nix copy
    pub identity_file: Option<String>,

    /// Alternate ssh client configuration file
    pub config_file: Option<String>,

    /// Disable host key verification
    pub skip_host_key_check: bool,

    /// Prompt once for the remote sudo password
    pub ask_for_sudo_password: bool,
}

impl SshOptions {
    /// Read settings from `SSH_USER`, `SSH_IDENTITY_FILE`, `SSH_CONFIG_FILE`
    /// and `SSH_SKIP_HOST_KEY_CHECK`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            default_username: non_empty("SSH_USER"),
            identity_file: non_empty("SSH_IDENTITY_FILE"),
            config_file: non_empty("SSH_CONFIG_FILE"),
            skip_host_key_check: non_empty("SSH_SKIP_HOST_KEY_CHECK").is_some(),
            ask_for_sudo_password: false,
        }
    }
}

/// Host selection options
#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Glob matched against host names
    pub glob: String,

    /// Hosts must carry all of these tags
    pub tags: Vec<String>,

    /// Ordering tags, overriding the deployment's own ordering when set
    pub ordering_tags: Vec<String>,

    pub skip: usize,

    pub every: usize,

    /// 0 disables the limit
    pub limit: usize,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            glob: "*".to_string(),
            tags: Vec::new(),
            ordering_tags: Vec::new(),
            skip: 0,
            every: 1,
            limit: 0,
        }
    }
}

/// Activation mode passed to `switch-to-configuration`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchAction {
    DryActivate,
    Test,
    #[default]
    Switch,
    Boot,
}

impl SwitchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchAction::DryActivate => "dry-activate",
            SwitchAction::Test => "test",
            SwitchAction::Switch => "switch",
            SwitchAction::Boot => "boot",
        }
    }

    /// Whether the system profile is updated before switching
    pub fn sets_profile(&self) -> bool {
        matches!(self, SwitchAction::Switch | SwitchAction::Boot)
    }

    /// Whether secrets may be uploaded for this action
    pub fn allows_secrets(&self) -> bool {
        !matches!(self, SwitchAction::DryActivate)
    }
}

impl fmt::Display for SwitchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SwitchAction {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry-activate" => Ok(SwitchAction::DryActivate),
            "test" => Ok(SwitchAction::Test),
            "switch" => Ok(SwitchAction::Switch),
            "boot" => Ok(SwitchAction::Boot),
            _ => Err(FleetError::ConfigError(format!(
                "Invalid switch action '{}', expected one of dry-activate|test|switch|boot",
                s
            ))),
        }
    }
}

/// Nix evaluation and build options
#[derive(Debug, Clone, Default)]
pub struct NixOptions {
    /// Nix expression evaluating the deployment into machines
    pub eval_machines: PathBuf,

    /// Pass `--show-trace` to nix commands
    pub show_trace: bool,

    /// Extra arguments for nix-build
    pub build_args: Vec<String>,
}

/// Deploy options
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Deployment file
    pub deployment: PathBuf,

    pub switch_action: SwitchAction,

    pub upload_secrets: bool,

    /// Reboot after activation, before health checks
    pub reboot: bool,

    pub skip_health_checks: bool,

    pub skip_pre_deploy_checks: bool,

    /// Seconds to wait for commands and check groups, 0 = unbounded
    pub timeout: u64,

    /// Deadline for a rebooted host to come back
    pub reboot_timeout: Duration,

    /// Build only, do not touch any host
    pub dry_run: bool,

    /// Print the execution plan without running it
    pub plan_only: bool,

    /// Maximum number of plan step actions running at once
    pub max_parallel: usize,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            deployment: PathBuf::new(),
            switch_action: SwitchAction::default(),
            upload_secrets: false,
            reboot: false,
            skip_health_checks: false,
            skip_pre_deploy_checks: false,
            timeout: 0,
            reboot_timeout: Duration::from_secs(600), // 10 minutes
            dry_run: false,
            plan_only: false,
            max_parallel: 8,
        }
    }
}

impl DeployOptions {
    /// Directory relative secret sources resolve against
    pub fn deployment_dir(&self) -> PathBuf {
        match self.deployment.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub ssh: SshOptions,

    pub select: SelectOptions,

    pub nix: NixOptions,

    pub deploy: DeployOptions,
}
