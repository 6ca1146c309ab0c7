//! Health check definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_period() -> u64 {
    2
}

fn default_timeout() -> u64 {
    10
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_port() -> u16 {
    80
}

/// Check executed as a command on the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdHealthCheck {
    pub description: String,

    pub cmd: Vec<String>,

    /// Seconds to wait between attempts
    #[serde(default = "default_period")]
    pub period: u64,

    /// Seconds a single attempt may take, 0 disables the bound
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Check executed as an HTTP GET against the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheck {
    pub description: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Overrides the host's target address when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, rename = "insecureSSL", alias = "insecureSsl")]
    pub insecure_ssl: bool,

    #[serde(default = "default_period")]
    pub period: u64,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl HttpHealthCheck {
    /// Target URL, falling back to `default_host` when no override is set
    pub fn url(&self, default_host: &str) -> String {
        let host = self.host.as_deref().unwrap_or(default_host);
        format!("{}://{}:{}{}", self.scheme, host, self.port, self.path)
    }
}

/// One check of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum HealthCheck {
    Cmd(CmdHealthCheck),
    Http(HttpHealthCheck),
}

impl HealthCheck {
    pub fn description(&self) -> &str {
        match self {
            HealthCheck::Cmd(check) => &check.description,
            HealthCheck::Http(check) => &check.description,
        }
    }

    pub fn period(&self) -> u64 {
        match self {
            HealthCheck::Cmd(check) => check.period,
            HealthCheck::Http(check) => check.period,
        }
    }

    pub fn timeout(&self) -> u64 {
        match self {
            HealthCheck::Cmd(check) => check.timeout,
            HealthCheck::Http(check) => check.timeout,
        }
    }
}

/// A named collection of checks as declared on a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    #[serde(default)]
    pub http: Vec<HttpHealthCheck>,

    #[serde(default)]
    pub cmd: Vec<CmdHealthCheck>,
}

impl HealthChecks {
    pub fn len(&self) -> usize {
        self.http.len() + self.cmd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All checks of the collection, command checks first
    pub fn all(&self) -> Vec<HealthCheck> {
        self.cmd
            .iter()
            .cloned()
            .map(HealthCheck::Cmd)
            .chain(self.http.iter().cloned().map(HealthCheck::Http))
            .collect()
    }
}
