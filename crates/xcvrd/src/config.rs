//! Configuration file support for xcvrd
//!
//! Loads and validates xcvrd configuration from TOML files.
//! Default location: /etc/sonic/xcvrd.conf

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, XcvrdError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/xcvrd.conf";

/// Poll loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Tick interval with real hardware
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Tick interval with simulated hardware
    #[serde(default = "default_simulated_interval_ms")]
    pub simulated_interval_ms: u64,

    /// Bound on every single hardware access
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Failed identification reads before an insertion is given up on
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Delay between identification retries
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Module hardware backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    /// Kernel optoe sysfs files
    #[default]
    Real,
    /// Synthetic modules seeded from the inventory
    Simulated,
}

/// Hardware configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub backend: HardwareBackend,
}

/// State database backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Redis,
    /// Process-local store, for bring-up without a database
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number for STATE_DB
    #[serde(default = "default_state_db_number")]
    pub state_db_number: u32,

    /// Redis database number for CONFIG_DB
    #[serde(default = "default_config_db_number")]
    pub config_db_number: u32,
}

/// Complete xcvrd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XcvrdConfig {
    /// Port inventory file
    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

// Default functions
fn default_interval_ms() -> u64 {
    500
}

fn default_simulated_interval_ms() -> u64 {
    100
}

fn default_read_timeout_ms() -> u64 {
    200
}

fn default_retry_budget() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_state_db_number() -> u32 {
    6
}

fn default_config_db_number() -> u32 {
    4
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("/etc/sonic/xcvrd_inventory.toml")
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            simulated_interval_ms: default_simulated_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            state_db_number: default_state_db_number(),
            config_db_number: default_config_db_number(),
        }
    }
}

impl Default for XcvrdConfig {
    fn default() -> Self {
        Self {
            inventory_path: default_inventory_path(),
            poll: PollConfig::default(),
            hardware: HardwareConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl XcvrdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                XcvrdError::Configuration(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "xcvrd: config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(XcvrdError::Io(e)),
        }
    }

    /// Tick interval for the configured hardware backend
    pub fn poll_interval(&self) -> Duration {
        match self.hardware.backend {
            HardwareBackend::Real => Duration::from_millis(self.poll.interval_ms),
            HardwareBackend::Simulated => Duration::from_millis(self.poll.simulated_interval_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.poll.retry_backoff_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 || self.poll.simulated_interval_ms == 0 {
            return Err(XcvrdError::Configuration(
                "poll intervals must be > 0".to_string(),
            ));
        }

        if self.poll.read_timeout_ms == 0 {
            return Err(XcvrdError::Configuration(
                "read_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.poll.retry_budget == 0 {
            return Err(XcvrdError::Configuration(
                "retry_budget must be > 0".to_string(),
            ));
        }

        if self.database.backend == DatabaseBackend::Redis && self.database.redis_port == 0 {
            return Err(XcvrdError::Configuration(
                "redis_port must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
