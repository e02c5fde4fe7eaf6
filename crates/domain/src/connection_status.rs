//! Connection status — the lifecycle states a connection can occupy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a connection.
///
/// The variants are not ordered by value; the only ordering is the one given
/// by the transition table in
/// [`StatusTransitions`](crate::status_transitions::StatusTransitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Startup,
    Setup,
    Connecting,
    Connected,
    Online,
    Disconnected,
    Offline,
    Disabled,
    Shutdown,
}

impl ConnectionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Startup,
        Self::Setup,
        Self::Connecting,
        Self::Connected,
        Self::Online,
        Self::Disconnected,
        Self::Offline,
        Self::Disabled,
        Self::Shutdown,
    ];

    /// Lower-case name, as used in events and configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Setup => "setup",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Online => "online",
            Self::Disconnected => "disconnected",
            Self::Offline => "offline",
            Self::Disabled => "disabled",
            Self::Shutdown => "shutdown",
        }
    }

    /// Name of the plugin hook that reacts to this status (e.g. `on_online`).
    #[must_use]
    pub fn hook_name(self) -> &'static str {
        match self {
            Self::Startup => "on_startup",
            Self::Setup => "on_setup",
            Self::Connecting => "on_connecting",
            Self::Connected => "on_connected",
            Self::Online => "on_online",
            Self::Disconnected => "on_disconnected",
            Self::Offline => "on_offline",
            Self::Disabled => "on_disabled",
            Self::Shutdown => "on_shutdown",
        }
    }

    /// `true` while a connection attempt is in flight or established.
    #[must_use]
    pub fn is_connecting_or_connected(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Online)
    }

    /// `true` for the states from which setup or shutdown may proceed directly.
    #[must_use]
    pub(crate) fn is_idle(self) -> bool {
        matches!(self, Self::Startup | Self::Offline | Self::Disabled)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ConnectionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
