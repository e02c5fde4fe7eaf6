//! Event bus port — publish connection status events to subscribers.

use std::future::Future;

use rulebridge_domain::error::BridgeError;
use rulebridge_domain::event::ConnectionStatusEvent;

/// Publishes status events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(
        &self,
        event: ConnectionStatusEvent,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}
