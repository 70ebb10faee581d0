// Configuration file handling for the blerelay CLI
//
// The relay configuration is stored as JSON in:
// - macOS: ~/Library/Application Support/blerelay/config.json
// - Linux: ~/.config/blerelay/config.json
// - Windows: %APPDATA%\blerelay\config.json

use anyhow::{Context, Result};
use blerelay_core::RelayConfig;
use std::path::{Path, PathBuf};

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform config directory
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("blerelay");
        Ok(Self::at(dir.join("config.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the config file, or defaults if there is none yet
    pub fn load(&self) -> Result<RelayConfig> {
        if !self.exists() {
            return Ok(RelayConfig::default());
        }
        RelayConfig::load(&self.path)
            .with_context(|| format!("Failed to load config file {}", self.path.display()))
    }

    pub fn save(&self, config: &RelayConfig) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        config
            .save(&self.path)
            .with_context(|| format!("Failed to write config file {}", self.path.display()))
    }

    /// Update one key and persist
    pub fn set(&self, key: &str, value: &str) -> Result<RelayConfig> {
        let mut config = self.load()?;
        set_value(&mut config, key, value)?;
        self.save(&config)?;
        Ok(config)
    }
}

pub fn set_value(config: &mut RelayConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "default_encryption_key" => config.default_encryption_key = value.to_string(),
        "reconnect.initial_delay_ms" => {
            config.reconnect.initial_delay_ms = value.parse().context("Invalid number")?;
        }
        "reconnect.max_delay_ms" => {
            config.reconnect.max_delay_ms = value.parse().context("Invalid number")?;
        }
        "reconnect.max_attempts" => {
            config.reconnect.max_attempts = match value {
                "" | "none" | "unlimited" => None,
                n => Some(n.parse().context("Invalid number")?),
            };
        }
        "logging.level" => config.logging.level = value.to_string(),
        "logging.log_dir" => {
            config.logging.log_dir = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        "logging.file_prefix" => config.logging.file_prefix = value.to_string(),
        "logging.ansi" => {
            config.logging.ansi = value.parse().context("Invalid boolean value")?;
        }
        "logging.json" => {
            config.logging.json = value.parse().context("Invalid boolean value")?;
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }
    config.validate().context("Rejected config value")?;
    Ok(())
}

pub fn get_value(config: &RelayConfig, key: &str) -> Option<String> {
    list(config)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// Every key with a printable value. The key itself is never shown.
pub fn list(config: &RelayConfig) -> Vec<(String, String)> {
    vec![
        (
            "default_encryption_key".to_string(),
            format!("<{} bytes>", config.default_encryption_key.len()),
        ),
        (
            "reconnect.initial_delay_ms".to_string(),
            config.reconnect.initial_delay_ms.to_string(),
        ),
        (
            "reconnect.max_delay_ms".to_string(),
            config.reconnect.max_delay_ms.to_string(),
        ),
        (
            "reconnect.max_attempts".to_string(),
            config
                .reconnect
                .max_attempts
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string()),
        ),
        ("logging.level".to_string(), config.logging.level.clone()),
        (
            "logging.log_dir".to_string(),
            config
                .logging
                .log_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(console only)".to_string()),
        ),
        (
            "logging.file_prefix".to_string(),
            config.logging.file_prefix.clone(),
        ),
        ("logging.ansi".to_string(), config.logging.ansi.to_string()),
        ("logging.json".to_string(), config.logging.json.to_string()),
    ]
}
