//! # rulebridge-adapter-mqtt
//!
//! MQTT adapter — runs a broker connection through the connection lifecycle.
//!
//! ## Responsibilities
//! - Create the rumqttc client from [`MqttConfig`] during setup, or disable the
//!   connection when MQTT is switched off
//! - Wait for the broker to accept the connection and keep the event loop
//!   running while connected
//! - Subscribe the configured topics once online and forward incoming
//!   messages on a broadcast channel
//! - Classify an unreachable broker as expected noise for logging
//!
//! ## Dependency rule
//! Same as other adapters: depends on `rulebridge-app` and `rulebridge-domain`.

pub mod config;
pub mod error;
pub mod plugins;
pub mod session;

pub use config::MqttConfig;
pub use error::{MqttError, is_silent_error};
pub use plugins::{MqttConnectionPlugin, MqttSubscriptionPlugin};
pub use session::{MqttConnection, MqttMessage, MqttSession, mqtt_connection};
