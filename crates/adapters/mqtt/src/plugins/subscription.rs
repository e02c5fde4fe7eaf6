//! Subscribes the configured topic filters once the connection is online.

use std::sync::Arc;

use rumqttc::QoS;
use tokio::sync::watch;

use rulebridge_app::connection::{ConnectionPlugin, HookArgs, HookResult, PluginHooks};
use rulebridge_domain::connection_status::ConnectionStatus;

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::session::MqttSession;

/// Subscribes every topic of [`MqttConfig::topics`] in `on_online`.
///
/// Subscriptions are repeated on every reconnect; the broker session is not
/// assumed to survive a disconnect.
pub struct MqttSubscriptionPlugin {
    config: watch::Receiver<MqttConfig>,
}

impl MqttSubscriptionPlugin {
    pub const PRIORITY: i32 = 50;

    #[must_use]
    pub fn new(config: watch::Receiver<MqttConfig>) -> Self {
        Self { config }
    }

    async fn on_online(self: Arc<Self>, args: HookArgs<MqttSession>) -> HookResult {
        let session = args.context.ok_or(MqttError::NotConnected)?;
        let topics = self.config.borrow().topics.clone();

        for topic in &topics {
            session
                .client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(MqttError::Client)?;
        }
        if !topics.is_empty() {
            tracing::info!(
                connection = %args.connection.name(),
                topics = %topics.join(", "),
                "MQTT topics subscribed"
            );
        }
        Ok(())
    }
}

impl ConnectionPlugin<MqttSession> for MqttSubscriptionPlugin {
    fn name(&self) -> &str {
        "mqtt-subscription"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn register_hooks(&self, hooks: &mut PluginHooks<Self, MqttSession>) {
        hooks.on(ConnectionStatus::Online, Self::on_online);
    }
}
