//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `rulebridge.toml` in the working directory, or the file named by
//! `RULEBRIDGE_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use rulebridge_adapter_mqtt::MqttConfig;
use serde::Deserialize;

const DEFAULT_PATH: &str = "rulebridge.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MQTT broker connection.
    pub mqtt: MqttConfig,
    /// Connection lifecycle tuning.
    pub connection: ConnectionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Connection lifecycle tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound of the reconnect back-off, in seconds.
    pub max_reconnect_wait_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from the config file (if present) then apply
    /// environment-variable overrides.
    ///
    /// Called again on `SIGHUP`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed or the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&config_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RULEBRIDGE_MQTT_HOST") {
            self.mqtt.host = val;
        }
        if let Ok(val) = std::env::var("RULEBRIDGE_MQTT_PORT")
            && let Ok(port) = val.parse()
        {
            self.mqtt.port = port;
        }
        if let Ok(val) = std::env::var("RULEBRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.is_active() && self.mqtt.port == 0 {
            return Err(ConfigError::Validation(
                "mqtt.port must be non-zero".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "mqtt.connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.connection.max_reconnect_wait_secs == 0 {
            return Err(ConfigError::Validation(
                "connection.max_reconnect_wait_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn max_reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_wait_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_wait_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "rulebridged=info,rulebridge_app=info,rulebridge_adapter_mqtt=info,rumqttc=warn"
                .to_string(),
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("RULEBRIDGE_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
