//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`BridgeError`]
//! via `#[from]` when crossing a port boundary.

use crate::connection_status::ConnectionStatus;

/// Top-level error shared by all crates.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A status transition was requested that violates the state machine contract.
    #[error("invalid status transition")]
    Transition(#[from] InvalidTransition),

    /// A named item could not be found.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A named item was registered twice.
    #[error("already registered")]
    AlreadyRegistered(#[from] AlreadyRegisteredError),

    /// An external collaborator (broker, event bus, …) failed.
    #[error("external service error")]
    External(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A forced status transition was requested in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransition {
    /// A manual transition is already queued and has not been consumed yet.
    #[error("manual transition to {queued} already queued, cannot queue {requested}")]
    ManualAlreadyQueued {
        /// The transition waiting in the slot.
        queued: ConnectionStatus,
        /// The transition that was rejected.
        requested: ConnectionStatus,
    },

    /// The current status is not a valid starting point for the transition.
    #[error("cannot go from {current} to {requested}")]
    UnexpectedStatus {
        /// The status the connection is in.
        current: ConnectionStatus,
        /// The status that was requested.
        requested: ConnectionStatus,
    },
}

/// Lookup of a named item failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} '{name}' not found")]
pub struct NotFoundError {
    /// What kind of item was looked up (e.g. `"Connection"`).
    pub kind: &'static str,
    /// The name used for the lookup.
    pub name: String,
}

/// A name was registered twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} '{name}' is already registered")]
pub struct AlreadyRegisteredError {
    /// What kind of item was registered (e.g. `"Connection"`).
    pub kind: &'static str,
    /// The duplicated name.
    pub name: String,
}
