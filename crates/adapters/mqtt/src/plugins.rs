//! Connection plugins of the MQTT connection.

pub mod client;
pub mod subscription;

pub use client::MqttConnectionPlugin;
pub use subscription::MqttSubscriptionPlugin;
