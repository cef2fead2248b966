//! Configuration
//!
//! A [`NasConfig`] describes one appliance connection and the timing knobs of
//! the drivers. Every section has working defaults, so an empty YAML document
//! is a valid configuration.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Connection
// =============================================================================

/// Appliance family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NasKind {
    /// Veritas SFS / Access, driven through clish over SSH
    Veritas,
    /// Dell EMC UnityXT, driven through its REST API
    Unityxt,
}

impl std::fmt::Display for NasKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NasKind::Veritas => write!(f, "veritas"),
            NasKind::Unityxt => write!(f, "unityxt"),
        }
    }
}

impl std::str::FromStr for NasKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "veritas" | "sfs" | "va" => Ok(NasKind::Veritas),
            "unityxt" | "unity" => Ok(NasKind::Unityxt),
            other => Err(Error::Configuration(format!("Unknown NAS kind: {}", other))),
        }
    }
}

/// Where and how to reach the appliance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConnectionConfig {
    pub kind: NasKind,
    pub host: String,
    /// SSH port, or HTTPS port for REST appliances
    pub port: Option<u16>,
    pub user: String,
    /// REST password; SSH uses the agent or key files
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// SSH private key file
    pub identity_file: Option<String>,
    /// Seconds to wait for the connection to open
    pub connect_timeout_secs: u64,
    /// Force a Veritas driver (`SFS`, `VA`, `VA74`) instead of discovering it
    pub driver: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: NasKind::Veritas,
            host: "localhost".to_string(),
            port: None,
            user: "support".to_string(),
            password: None,
            identity_file: None,
            connect_timeout_secs: 30,
            driver: None,
        }
    }
}

// =============================================================================
// Driver Timings
// =============================================================================

/// Clish console settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClishConfig {
    /// Console user commands run as
    pub user: String,
    /// Retries when the cluster console switches nodes
    pub retries: u32,
    /// Seconds between those retries
    pub retry_delay_secs: u64,
}

impl Default for ClishConfig {
    fn default() -> Self {
        Self {
            user: "master".to_string(),
            retries: 3,
            retry_delay_secs: 10,
        }
    }
}

impl ClishConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Per-command timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TimeoutConfig {
    pub listing_secs: u64,
    pub create_secs: u64,
    pub delete_secs: u64,
    pub online_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            listing_secs: 5 * 60,
            create_secs: 15 * 60,
            delete_secs: 15 * 60,
            online_secs: 5 * 60,
        }
    }
}

impl TimeoutConfig {
    pub fn listing(&self) -> Duration {
        Duration::from_secs(self.listing_secs)
    }

    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create_secs)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }

    pub fn online(&self) -> Duration {
        Duration::from_secs(self.online_secs)
    }
}

/// Retries of a file system lookup that returned incomplete data
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryConfig {
    pub retries: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            delay_secs: 15,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// REST client settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RestConfig {
    /// Attempts on connection errors
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
    /// Accept self-signed appliance certificates
    pub accept_invalid_certs: bool,
    /// Checks of a NAS server's home SP after a failback
    pub failback_checks: u32,
    pub failback_interval_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_secs: 3,
            request_timeout_secs: 60,
            accept_invalid_certs: true,
            failback_checks: 60,
            failback_interval_secs: 5,
        }
    }
}

impl RestConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn failback_interval(&self) -> Duration {
        Duration::from_secs(self.failback_interval_secs)
    }
}

// =============================================================================
// Root Configuration
// =============================================================================

/// Complete configuration of one appliance connection
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NasConfig {
    pub connection: ConnectionConfig,
    pub clish: ClishConfig,
    pub timeouts: TimeoutConfig,
    pub fs_get_retry: RetryConfig,
    pub rest: RestConfig,
}

impl NasConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// JSON schema of the configuration file
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(NasConfig)
    }

    /// Configuration with every delay set to zero
    pub fn without_delays() -> Self {
        let mut config = Self::default();
        config.clish.retry_delay_secs = 0;
        config.fs_get_retry.delay_secs = 0;
        config.rest.retry_delay_secs = 0;
        config.rest.failback_interval_secs = 0;
        config
    }
}
