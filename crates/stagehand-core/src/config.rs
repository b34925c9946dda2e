//! Control-plane configuration loaded from TOML.
//!
//! ```toml
//! [conflict_retry]
//! max_attempts = 16
//! initial_backoff_ms = 1
//! max_backoff_ms = 50
//!
//! [expiration]
//! task_ttl_secs = 18000
//! failed_retention_secs = 7200
//! finished_retention_secs = 3600
//!
//! [sweeper]
//! interval_secs = 60
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlPlaneConfig {
    pub conflict_retry: ConflictRetryConfig,
    pub expiration: ExpirationConfig,
    pub sweeper: SweeperConfig,
}

/// Bounded retry of read-compute-write cycles on version conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConflictRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff_ms: 1,
            max_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpirationConfig {
    /// Lifetime of a task that has not finished.
    pub task_ttl_secs: u64,

    /// Extra time a FAILED task is kept for postmortems.
    pub failed_retention_secs: u64,

    pub finished_retention_secs: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            task_ttl_secs: 5 * 60 * 60,
            failed_retention_secs: 2 * 60 * 60,
            finished_retention_secs: 60 * 60,
        }
    }
}

impl ExpirationConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::from_secs(self.failed_retention_secs)
    }

    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ControlPlaneConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.conflict_retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "conflict_retry.max_attempts must be at least 1".into(),
            ));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "conflict_retry.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                retry.initial_backoff_ms, retry.max_backoff_ms
            )));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
