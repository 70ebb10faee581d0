//! Tracing subscriber setup

use crate::config::{ConfigError, LogConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the background file writer alive. Drop it last.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
    installed: bool,
}

impl LoggingGuard {
    /// `false` if another global subscriber was already set and kept
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Install the global subscriber: console output plus an optional
/// daily-rolling file. `RUST_LOG` overrides `config.level`.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard, ConfigError> {
    config.validate()?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Invalid(format!("invalid log level: {}", e)))?,
    };

    let console = fmt::layer().with_ansi(config.ansi).with_target(false);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized at {}", config.level);
    }

    Ok(LoggingGuard {
        _file: guard,
        installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_is_repeatable_and_creates_log_dir() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            log_dir: Some(dir.path().join("logs")),
            json: true,
            ..LogConfig::default()
        };

        let _first = init_logging(&config).unwrap();
        let second = init_logging(&LogConfig::default()).unwrap();

        assert!(!second.installed());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LogConfig {
            level: "blerelay_core=loudest".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(ConfigError::Invalid(_))));
    }
}
