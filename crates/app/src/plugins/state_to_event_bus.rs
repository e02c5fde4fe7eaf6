//! Publishes connection status changes on the event bus.

use std::sync::{Arc, Mutex};

use rulebridge_domain::connection_status::ConnectionStatus;
use rulebridge_domain::event::ConnectionStatusEvent;

use crate::connection::{ConnectionContext, ConnectionPlugin, HookArgs, HookResult, PluginHooks};
use crate::ports::EventPublisher;
use crate::sync::lock;

/// Emits a [`ConnectionStatusEvent`] when the connection comes online or
/// disconnects. The same status is never published twice in a row.
pub struct ConnectionStateToEventBusPlugin<P> {
    publisher: P,
    last_published: Mutex<Option<ConnectionStatus>>,
}

impl<P> ConnectionStateToEventBusPlugin<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    /// Runs after connection-specific plugins, before auto-reconnect.
    pub const PRIORITY: i32 = -100_000;

    /// Create the plugin publishing through `publisher`.
    #[must_use]
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            last_published: Mutex::new(None),
        }
    }

    async fn publish_status<C: ConnectionContext>(
        self: Arc<Self>,
        args: HookArgs<C>,
    ) -> HookResult {
        let status = args.connection.status();
        {
            let mut last = lock(&self.last_published);
            if *last == Some(status) {
                return Ok(());
            }
            *last = Some(status);
        }

        let event = ConnectionStatusEvent::new(args.connection.name(), status);
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(
                connection = %args.connection.name(),
                %status,
                error = %err,
                "failed to publish connection status"
            );
        }
        Ok(())
    }
}

impl<P, C> ConnectionPlugin<C> for ConnectionStateToEventBusPlugin<P>
where
    P: EventPublisher + Send + Sync + 'static,
    C: ConnectionContext,
{
    fn name(&self) -> &str {
        "connection-state-to-event-bus"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn register_hooks(&self, hooks: &mut PluginHooks<Self, C>) {
        hooks
            .on(ConnectionStatus::Online, Self::publish_status)
            .on(ConnectionStatus::Disconnected, Self::publish_status);
    }
}
