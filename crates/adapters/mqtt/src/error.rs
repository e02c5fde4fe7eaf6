//! MQTT adapter error types.

use std::time::Duration;

use rulebridge_app::connection::PluginError;
use rulebridge_domain::error::BridgeError;
use rumqttc::ConnectionError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// A hook needed the MQTT session but none has been set up.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The connection to the broker failed or was lost.
    #[error("MQTT connection error")]
    Connection(#[source] ConnectionError),

    /// The broker did not acknowledge the connection in time.
    #[error("MQTT broker did not answer within {0:?}")]
    ConnectTimeout(Duration),

    /// Failed to parse an incoming MQTT payload as JSON.
    #[error("failed to parse MQTT payload")]
    PayloadParse(#[source] serde_json::Error),

    /// A domain-level error (invalid transition, etc.).
    #[error("domain error")]
    Domain(#[source] BridgeError),
}

impl MqttError {
    /// Convert into a [`BridgeError::External`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        match self {
            Self::Domain(err) => err,
            other => BridgeError::External(Box::new(other)),
        }
    }

    /// `true` for the failures expected while the broker is unreachable.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        match self {
            Self::ConnectTimeout(_) => true,
            Self::Connection(err) => matches!(
                err,
                ConnectionError::ConnectionRefused(_)
                    | ConnectionError::Io(_)
                    | ConnectionError::NetworkTimeout
            ),
            _ => false,
        }
    }
}

impl From<MqttError> for BridgeError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}

impl From<MqttError> for PluginError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::Domain(err) => PluginError::Domain(err),
            MqttError::NotConnected => PluginError::MissingContext,
            other => PluginError::failed(other),
        }
    }
}

/// Classifier for [`Connection::with_silent_errors`](rulebridge_app::connection::Connection::with_silent_errors):
/// an unreachable broker is logged at `debug` level.
#[must_use]
pub fn is_silent_error(err: &PluginError) -> bool {
    match err {
        PluginError::Failed(source) => source
            .downcast_ref::<MqttError>()
            .is_some_and(MqttError::is_silent),
        _ => false,
    }
}
