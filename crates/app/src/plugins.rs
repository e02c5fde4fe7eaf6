//! Built-in plugins shared by every connection type.
//!
//! Both run with very negative priorities so that connection-specific plugins
//! have finished their work for a status before these react to it.

pub mod auto_reconnect;
pub mod state_to_event_bus;

pub use auto_reconnect::AutoReconnectPlugin;
pub use state_to_event_bus::ConnectionStateToEventBusPlugin;
