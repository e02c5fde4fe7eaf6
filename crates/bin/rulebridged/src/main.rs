//! # rulebridged — rulebridge daemon
//!
//! Composition root that wires the MQTT connection together and runs it.
//!
//! ## Responsibilities
//! - Parse configuration (env vars, config file)
//! - Initialise structured logging
//! - Construct the event bus, the connection manager and the MQTT connection
//!   with its plugins
//! - Start every connection once wiring is complete
//! - Reload the configuration on `SIGHUP`
//! - Handle graceful shutdown (`SIGTERM`/`SIGINT`)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! Lifecycle rules live in `rulebridge-app`; this crate only wires them up.

mod config;

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

use rulebridge_adapter_mqtt::{
    MqttConfig, MqttConnection, MqttConnectionPlugin, MqttMessage, MqttSubscriptionPlugin,
    mqtt_connection,
};
use rulebridge_app::connection::ConnectionManager;
use rulebridge_app::event_bus::InProcessEventBus;
use rulebridge_app::plugins::{AutoReconnectPlugin, ConnectionStateToEventBusPlugin};
use rulebridge_domain::event::ConnectionStatusEvent;

use crate::config::Config;

const EVENT_BUS_CAPACITY: usize = 256;
const MESSAGE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config.logging.filter);

    let event_bus = InProcessEventBus::new(EVENT_BUS_CAPACITY);
    let (mqtt_config_tx, mqtt_config_rx) = watch::channel(config.mqtt.clone());

    let manager = ConnectionManager::new();

    // MQTT connection
    let mqtt = manager.add(mqtt_connection("mqtt"))?;
    let mqtt_plugin = Arc::new(MqttConnectionPlugin::new(
        mqtt_config_rx.clone(),
        MESSAGE_CAPACITY,
    ));
    mqtt.register_plugin(Arc::clone(&mqtt_plugin))?;
    mqtt.register_plugin(Arc::new(MqttSubscriptionPlugin::new(mqtt_config_rx)))?;
    mqtt.register_plugin(Arc::new(ConnectionStateToEventBusPlugin::new(
        event_bus.clone(),
    )))?;
    mqtt.register_plugin(Arc::new(AutoReconnectPlugin::new(
        config.connection.max_reconnect_wait(),
    )))?;

    tokio::spawn(log_status_events(event_bus.subscribe()));
    tokio::spawn(log_messages(mqtt_plugin.subscribe()));

    manager.application_startup_complete();
    tracing::info!(connections = ?manager.names(), "rulebridged started");

    wait_for_shutdown(&mqtt, &mqtt_config_tx).await?;

    manager.on_application_shutdown().await;
    tracing::info!("rulebridged stopped");
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Serve `SIGHUP` reloads until an interrupt or terminate signal arrives.
#[cfg(unix)]
async fn wait_for_shutdown(
    mqtt: &MqttConnection,
    mqtt_config: &watch::Sender<MqttConfig>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("interrupt received, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => reload(mqtt, mqtt_config),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _mqtt: &MqttConnection,
    _mqtt_config: &watch::Sender<MqttConfig>,
) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("interrupt received, shutting down");
    Ok(())
}

/// Re-read the configuration and set the MQTT connection up again if its
/// section changed. A broken file keeps the running configuration.
#[cfg_attr(not(unix), allow(dead_code))]
fn reload(mqtt: &MqttConnection, mqtt_config: &watch::Sender<MqttConfig>) {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "configuration reload failed, keeping current settings");
            return;
        }
    };

    let changed = mqtt_config.send_if_modified(|current| {
        if *current == config.mqtt {
            return false;
        }
        *current = config.mqtt;
        true
    });
    if changed {
        tracing::info!("MQTT configuration changed, reconnecting");
        mqtt.status_configuration_changed();
    } else {
        tracing::debug!("configuration reloaded, MQTT settings unchanged");
    }
}

async fn log_status_events(mut events: broadcast::Receiver<ConnectionStatusEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::info!(
                connection = %event.connection,
                status = %event.status,
                topic = event.topic(),
                "connection status event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_messages(mut messages: broadcast::Receiver<MqttMessage>) {
    loop {
        match messages.recv().await {
            Ok(message) => tracing::debug!(
                topic = %message.topic,
                bytes = message.payload.len(),
                retain = message.retain,
                "MQTT message"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "MQTT message subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
