//! Connections — the status state machine, plugin orchestration and the
//! registry that drives every connection through startup and shutdown.
//!
//! A [`Connection`] owns its state machine and a sorted list of
//! [`PluginCallbackHandler`]s per status. Plugins implement
//! [`ConnectionPlugin`] and are registered with
//! [`Connection::register_plugin`]. The [`ConnectionManager`] fans the
//! application-wide startup/shutdown signals out to every connection.

pub mod callback;
pub mod lifecycle;
pub mod manager;
pub mod plugin;

pub use callback::{HookFuture, PluginCallbackHandler, PluginInfo};
pub use lifecycle::{Connection, SilentErrorClassifier};
pub use manager::{ConnectionManager, ManagedConnection};
pub use plugin::{
    ConnectionContext, ConnectionPlugin, HookArgs, HookResult, PluginError, PluginHooks,
    RegistrationError,
};
