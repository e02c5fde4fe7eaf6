//! MQTT session context and incoming messages.

use rumqttc::{AsyncClient, Publish};
use serde::de::DeserializeOwned;

use rulebridge_app::connection::Connection;

use crate::error::{MqttError, is_silent_error};

/// Connection context of an MQTT connection, rebuilt on every setup.
#[derive(Clone)]
pub struct MqttSession {
    /// Client handle used to subscribe and publish.
    pub client: AsyncClient,
}

/// A connection whose context is an [`MqttSession`].
pub type MqttConnection = Connection<MqttSession>;

/// Create an MQTT connection that logs an unreachable broker at `debug` level.
#[must_use]
pub fn mqtt_connection(name: impl Into<String>) -> std::sync::Arc<MqttConnection> {
    Connection::with_silent_errors(name, is_silent_error)
}

/// A message received on one of the subscribed topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl MqttMessage {
    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::PayloadParse`] if the payload is not valid JSON
    /// for `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, MqttError> {
        serde_json::from_slice(&self.payload).map_err(MqttError::PayloadParse)
    }
}

impl From<Publish> for MqttMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
            retain: publish.retain,
        }
    }
}
