//! Relay configuration
//!
//! Serializable to/from JSON. Holds the fallback encryption key, the
//! reconnect backoff policy and logging options.

use crate::params::MIN_KEY_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Key used when neither the caller nor the config file supplies one
pub const DEFAULT_ENCRYPTION_KEY: &str = "blerelay";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Exponential backoff for rebinding the Radio Service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: Some(8),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based), or `None` once the
    /// attempts are used up
    pub fn backoff_duration(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let factor = 2u64.saturating_pow(attempt.min(16));
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Some(Duration::from_millis(delay_ms.min(self.max_delay_ms)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.initial_delay_ms must be > 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must be >= initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging output options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `blerelay_core=debug`. `RUST_LOG` wins.
    pub level: String,
    /// Write daily-rolling log files here as well as to the console
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    pub ansi: bool,
    /// Write the log file as JSON lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "blerelay".to_string(),
            ansi: true,
            json: false,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        EnvFilter::try_new(&self.level).map_err(|e| {
            ConfigError::Invalid(format!("invalid log level {:?}: {}", self.level, e))
        })?;
        if self.log_dir.is_some() && self.file_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.file_prefix must not be empty when log_dir is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Used by `update_parameters` when the caller passes no key
    pub default_encryption_key: String,
    pub reconnect: ReconnectPolicy,
    pub logging: LogConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_encryption_key: DEFAULT_ENCRYPTION_KEY.to_string(),
            reconnect: ReconnectPolicy::default(),
            logging: LogConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_encryption_key.len() < MIN_KEY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "default_encryption_key must be at least {} bytes",
                MIN_KEY_BYTES
            )));
        }
        self.reconnect.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
