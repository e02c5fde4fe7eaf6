//! # rulebridge-app
//!
//! Application layer — the connection lifecycle core and **port definitions**.
//!
//! ## Responsibilities
//! - Drive each [`Connection`](connection::Connection) through its status state
//!   machine, running plugin hooks in priority order for every status entered
//! - Keep the registry of connections
//!   ([`ConnectionManager`](connection::ConnectionManager)) and fan the
//!   application startup/shutdown signals out to them
//! - Define **port traits** that adapters must implement:
//!   - `EventPublisher` — publish connection status events
//! - Provide the built-in plugins (auto-reconnect, status to event bus)
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `rulebridge-domain` only (plus `tokio` for tasks and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod connection;
pub mod event_bus;
pub mod plugins;
pub mod ports;
pub(crate) mod sync;
