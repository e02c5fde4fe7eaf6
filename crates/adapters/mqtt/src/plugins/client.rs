//! Broker connection plugin: owns the rumqttc client and event loop.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use rumqttc::{AsyncClient, Event, EventLoop, Packet};
use tokio::sync::{OwnedMutexGuard, broadcast, watch};
use tokio::task::JoinHandle;

use rulebridge_app::connection::{ConnectionPlugin, HookArgs, HookResult, PluginHooks};
use rulebridge_domain::connection_status::ConnectionStatus;
use rulebridge_domain::error::BridgeError;

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::session::{MqttConnection, MqttMessage, MqttSession};

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 64;

type SharedEventLoop = Arc<tokio::sync::Mutex<EventLoop>>;

/// Creates the MQTT client during setup, waits for the broker to accept the
/// connection and keeps the event loop running while connected.
///
/// Incoming publishes are forwarded to every receiver returned by
/// [`subscribe`](Self::subscribe). When the event loop fails the connection is
/// marked as errored, which takes it down and lets auto-reconnect retry.
pub struct MqttConnectionPlugin {
    config: watch::Receiver<MqttConfig>,
    event_loop: Mutex<Option<SharedEventLoop>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    messages: broadcast::Sender<MqttMessage>,
}

impl MqttConnectionPlugin {
    pub const PRIORITY: i32 = 100;

    /// Create the plugin; the configuration is re-read on every setup.
    #[must_use]
    pub fn new(config: watch::Receiver<MqttConfig>, message_capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(message_capacity);
        Self {
            config,
            event_loop: Mutex::new(None),
            pump: Mutex::new(None),
            messages,
        }
    }

    /// Receive the messages arriving on subscribed topics.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MqttMessage> {
        self.messages.subscribe()
    }

    fn shared_event_loop(&self) -> Option<SharedEventLoop> {
        self.event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn on_setup(self: Arc<Self>, args: HookArgs<MqttSession>) -> HookResult {
        let config = self.config.borrow().clone();
        if !config.is_active() {
            tracing::info!(
                connection = %args.connection.name(),
                enabled = config.enabled,
                "MQTT connection disabled by configuration"
            );
            args.connection
                .status_from_setup_to_disabled()
                .map_err(BridgeError::from)?;
            return Ok(());
        }

        let (client, event_loop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        *self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(tokio::sync::Mutex::new(event_loop)));
        args.connection.set_context(MqttSession { client });

        tracing::debug!(
            connection = %args.connection.name(),
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "MQTT client created"
        );
        Ok(())
    }

    async fn on_connecting(self: Arc<Self>, args: HookArgs<MqttSession>) -> HookResult {
        let shared = self.shared_event_loop().ok_or(MqttError::NotConnected)?;
        let timeout = self.config.borrow().connect_timeout();

        let mut event_loop = shared.lock_owned().await;
        match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                event_loop.clean();
                return Err(MqttError::ConnectTimeout(timeout).into());
            }
        }
        tracing::info!(connection = %args.connection.name(), "MQTT broker accepted connection");

        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&args.connection),
            event_loop,
            self.messages.clone(),
        ));
        if let Some(previous) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pump)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn on_disconnected(self: Arc<Self>, args: HookArgs<MqttSession>) -> HookResult {
        if let Some(pump) = self.take_pump() {
            pump.abort();
            // the pump holds the event loop until it is gone
            let _ = pump.await;
        }
        if let Some(shared) = self.shared_event_loop() {
            shared.lock().await.clean();
        }
        tracing::debug!(connection = %args.connection.name(), "MQTT session closed");
        Ok(())
    }
}

impl ConnectionPlugin<MqttSession> for MqttConnectionPlugin {
    fn name(&self) -> &str {
        "mqtt-connection"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn register_hooks(&self, hooks: &mut PluginHooks<Self, MqttSession>) {
        hooks
            .on(ConnectionStatus::Setup, Self::on_setup)
            .on(ConnectionStatus::Connecting, Self::on_connecting)
            .on(ConnectionStatus::Disconnected, Self::on_disconnected);
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), MqttError> {
    loop {
        let event = event_loop.poll().await.map_err(MqttError::Connection)?;
        if let Event::Incoming(Packet::ConnAck(_)) = event {
            return Ok(());
        }
    }
}

async fn pump_events(
    connection: Weak<MqttConnection>,
    mut event_loop: OwnedMutexGuard<EventLoop>,
    messages: broadcast::Sender<MqttMessage>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, "MQTT message received");
                // no receivers is fine
                let _ = messages.send(MqttMessage::from(publish));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("disconnected by MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let err = MqttError::Connection(err);
                if err.is_silent() {
                    tracing::debug!(error = ?err, "MQTT connection lost");
                } else {
                    tracing::warn!(error = ?err, "MQTT connection lost");
                }
                break;
            }
        }
    }
    drop(event_loop);

    if let Some(connection) = connection.upgrade() {
        connection.set_error();
    }
}
