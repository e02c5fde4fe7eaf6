//! Status transitions — the connection state machine.
//!
//! ```text
//! Startup ──setup──▶ Setup ──▶ Connecting ──▶ Connected ──▶ Online
//!                      │            │              │           │
//!                    error          └──── error / setup / shutdown
//!                      ▼                           ▼
//!                  Disabled              Disconnected ──▶ Offline ──no error──▶ Connecting
//!                                                               │
//!                                                            shutdown
//!                                                               ▼
//!                                                           Shutdown
//! ```
//!
//! The next status is computed fresh on every call from the current status and
//! three request flags. The order in which the flags are checked is part of the
//! contract: an error or a reconfiguration always drains an active connection
//! back to `Disconnected` before anything else happens.

use crate::connection_status::ConnectionStatus;
use crate::error::InvalidTransition;

/// Current status, the request flags and the one-shot manual override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransitions {
    status: ConnectionStatus,
    manual: Option<ConnectionStatus>,
    /// The connection reported an error.
    pub error: bool,
    /// (Re-)setup was requested, e.g. after a configuration change.
    pub setup: bool,
    /// Shutdown was requested. Never cleared once set.
    pub shutdown: bool,
}

impl Default for StatusTransitions {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Startup,
            manual: None,
            error: false,
            setup: false,
            shutdown: false,
        }
    }
}

impl StatusTransitions {
    /// Create a state machine in [`ConnectionStatus::Startup`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// The queued manual transition, if any.
    #[must_use]
    pub fn manual(&self) -> Option<ConnectionStatus> {
        self.manual
    }

    /// `true` for `Connecting`, `Connected` and `Online`.
    #[must_use]
    pub fn is_connecting_or_connected(&self) -> bool {
        self.status.is_connecting_or_connected()
    }

    /// Move to the next status and return it.
    ///
    /// A queued manual transition is consumed first. Returns `None` when no
    /// transition is due; callers stop looping at that point.
    pub fn advance_status(&mut self) -> Option<ConnectionStatus> {
        let next = self.manual.take().or_else(|| self.next_step())?;
        self.status = next;
        Some(next)
    }

    /// Queue a forced transition that bypasses the automatic table once.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition::ManualAlreadyQueued`] if a manual
    /// transition is still waiting to be consumed.
    pub fn set_manual(&mut self, status: ConnectionStatus) -> Result<(), InvalidTransition> {
        if let Some(queued) = self.manual {
            return Err(InvalidTransition::ManualAlreadyQueued {
                queued,
                requested: status,
            });
        }
        self.manual = Some(status);
        Ok(())
    }

    /// Force `Setup → Disabled`, e.g. because the configuration disables the connection.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the current status is not `Setup` or a
    /// manual transition is already queued.
    pub fn from_setup_to_disabled(&mut self) -> Result<(), InvalidTransition> {
        self.expect_status(&[ConnectionStatus::Setup], ConnectionStatus::Disabled)?;
        self.set_manual(ConnectionStatus::Disabled)
    }

    /// Force `Connected/Online → Disconnected`, e.g. after a monitored disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the connection is neither `Connected`
    /// nor `Online`, or a manual transition is already queued.
    pub fn from_connected_to_disconnected(&mut self) -> Result<(), InvalidTransition> {
        self.expect_status(
            &[ConnectionStatus::Connected, ConnectionStatus::Online],
            ConnectionStatus::Disconnected,
        )?;
        self.set_manual(ConnectionStatus::Disconnected)
    }

    fn expect_status(
        &self,
        allowed: &[ConnectionStatus],
        requested: ConnectionStatus,
    ) -> Result<(), InvalidTransition> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(InvalidTransition::UnexpectedStatus {
                current: self.status,
                requested,
            })
        }
    }

    fn next_step(&mut self) -> Option<ConnectionStatus> {
        let status = self.status;

        if self.error {
            if status.is_connecting_or_connected() {
                return Some(ConnectionStatus::Disconnected);
            }
            if status == ConnectionStatus::Setup {
                return Some(ConnectionStatus::Disabled);
            }
        }

        // disconnect first, then setup again
        if self.setup {
            if status.is_connecting_or_connected() {
                return Some(ConnectionStatus::Disconnected);
            }
            if status.is_idle() {
                self.setup = false;
                return Some(ConnectionStatus::Setup);
            }
        }

        if self.shutdown {
            if status.is_connecting_or_connected() {
                return Some(ConnectionStatus::Disconnected);
            }
            if status.is_idle() {
                return Some(ConnectionStatus::Shutdown);
            }
        }

        if !self.error && status == ConnectionStatus::Offline {
            return Some(ConnectionStatus::Connecting);
        }

        automatic_transition(status)
    }
}

/// Single-hop transitions that happen without any flag being set.
fn automatic_transition(status: ConnectionStatus) -> Option<ConnectionStatus> {
    match status {
        ConnectionStatus::Connecting => Some(ConnectionStatus::Connected),
        ConnectionStatus::Connected => Some(ConnectionStatus::Online),
        ConnectionStatus::Disconnected => Some(ConnectionStatus::Offline),
        ConnectionStatus::Setup => Some(ConnectionStatus::Connecting),
        _ => None,
    }
}
