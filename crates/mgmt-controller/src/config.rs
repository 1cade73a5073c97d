//! # Controller Configuration
//!
//! [`ControllerConfig`] is the serializable form, loaded with [`load_config`] from an
//! optional file and `PREFIX__*` environment variables. [`ControllerSettings`] is the
//! resolved form the engine works with.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Upper bound on any single blocking wait inside a step
    #[serde(default = "default_blocking_timeout_ms")]
    pub blocking_timeout_ms: u64,

    /// How long a prepared operation waits for its commit decision; unbounded if unset
    #[serde(default)]
    pub prepared_timeout_ms: Option<u64>,

    /// How long a writing operation waits for the controller write lock
    #[serde(default = "default_write_lock_timeout_ms")]
    pub write_lock_timeout_ms: u64,

    /// Request channel capacity of transport actors
    #[serde(default = "default_actor_buffer")]
    pub actor_buffer: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_blocking_timeout_ms() -> u64 {
    300_000
}

fn default_write_lock_timeout_ms() -> u64 {
    300_000
}

fn default_actor_buffer() -> usize {
    32
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_ms: default_blocking_timeout_ms(),
            prepared_timeout_ms: None,
            write_lock_timeout_ms: default_write_lock_timeout_ms(),
            actor_buffer: default_actor_buffer(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            blocking_timeout: Duration::from_millis(self.blocking_timeout_ms),
            prepared_timeout: self.prepared_timeout_ms.map(Duration::from_millis),
            write_lock_timeout: Duration::from_millis(self.write_lock_timeout_ms),
        }
    }
}

/// Timeouts applied by a running controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub blocking_timeout: Duration,
    pub prepared_timeout: Option<Duration>,
    pub write_lock_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerConfig::default().settings()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Loads `T` from `path` (any format the `config` crate recognises, optional) overlaid with
/// environment variables named `{env_prefix}__SECTION__KEY`.
pub fn load_config<T: DeserializeOwned>(path: &str, env_prefix: &str) -> Result<T, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ControllerConfig = toml::from_str(
            r#"
            prepared_timeout_ms = 500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.blocking_timeout_ms, 300_000);
        assert_eq!(config.actor_buffer, 32);
        assert_eq!(config.logging.level, "debug");

        let settings = config.settings();
        assert_eq!(settings.prepared_timeout, Some(Duration::from_millis(500)));
        assert_eq!(settings.write_lock_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config: ControllerConfig =
            load_config("does-not-exist/mgmt-controller", "MGMT_CONTROLLER_TEST_UNSET").unwrap();
        assert_eq!(config.prepared_timeout_ms, None);
        assert_eq!(config.logging.level, "info");
    }
}
