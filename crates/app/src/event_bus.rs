//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use rulebridge_domain::error::BridgeError;
use rulebridge_domain::event::ConnectionStatusEvent;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped).
#[derive(Clone)]
pub struct InProcessEventBus {
    sender: broadcast::Sender<ConnectionStatusEvent>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(
        &self,
        event: ConnectionStatusEvent,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        tracing::trace!(
            topic = event.topic(),
            connection = %event.connection,
            status = %event.status,
            subscribers = self.sender.receiver_count(),
            "publishing event"
        );
        // zero receivers is not an error
        let _ = self.sender.send(event);
        async { Ok(()) }
    }
}
