//! MQTT connection configuration.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

/// Smallest keep-alive interval rumqttc accepts.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Configuration of the MQTT broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Set to `false` to keep the connection disabled.
    pub enabled: bool,
    /// MQTT broker hostname or IP address. Empty disables the connection.
    pub host: String,
    /// MQTT broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// Optional user name; the password is only sent together with it.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// How long to wait for the broker to acknowledge the connection, in seconds.
    pub connect_timeout_secs: u64,
    /// Topic filters subscribed once the connection is online.
    pub topics: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "rulebridge".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            topics: Vec::new(),
        }
    }
}

impl MqttConfig {
    /// `true` if a client should be created for this configuration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.host.trim().is_empty()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Build the rumqttc client options.
    #[must_use]
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, self.host.trim(), self.port);
        options.set_keep_alive(Duration::from_secs(
            self.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}
