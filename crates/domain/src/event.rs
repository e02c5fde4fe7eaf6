//! Event — an immutable record of a connection status change.
//!
//! Published on the event bus so automation rules can react to connectivity
//! changes of the broker or the home-automation server.

use serde::{Deserialize, Serialize};

use crate::connection_status::ConnectionStatus;
use crate::time::{Timestamp, now};

/// Well-known topic for [`ConnectionStatusEvent`]s.
pub const CONNECTION_STATUS_TOPIC: &str = "connection.status";

/// A connection settled in a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
    /// Name of the connection (e.g. `"mqtt"`).
    pub connection: String,
    /// The status that was reached.
    pub status: ConnectionStatus,
    /// When the status was reached.
    pub timestamp: Timestamp,
}

impl ConnectionStatusEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(connection: impl Into<String>, status: ConnectionStatus) -> Self {
        Self {
            connection: connection.into(),
            status,
            timestamp: now(),
        }
    }

    /// Topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        CONNECTION_STATUS_TOPIC
    }
}
