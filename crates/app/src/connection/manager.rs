//! Connection manager — registry of all connections and fan-out of the
//! application lifecycle signals.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use rulebridge_domain::connection_status::ConnectionStatus;
use rulebridge_domain::error::{AlreadyRegisteredError, NotFoundError};

use super::lifecycle::Connection;
use super::plugin::ConnectionContext;
use crate::sync::{read, write};

/// Future returned by [`ManagedConnection::wait_settled`].
pub type SettledFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Context-agnostic view of a [`Connection`], as held by the manager.
pub trait ManagedConnection: Send + Sync {
    /// Connection name.
    fn name(&self) -> &str;

    /// Current status.
    fn status(&self) -> ConnectionStatus;

    /// Kick off the first setup.
    fn application_startup_complete(&self);

    /// Request an orderly shutdown.
    fn application_shutdown(&self);

    /// Resolve once the connection's advance task is idle.
    fn wait_settled(&self) -> SettledFuture<'_>;
}

impl<C: ConnectionContext> ManagedConnection for Connection<C> {
    fn name(&self) -> &str {
        Connection::name(self)
    }

    fn status(&self) -> ConnectionStatus {
        Connection::status(self)
    }

    fn application_startup_complete(&self) {
        Connection::application_startup_complete(self);
    }

    fn application_shutdown(&self) {
        Connection::application_shutdown(self);
    }

    fn wait_settled(&self) -> SettledFuture<'_> {
        Box::pin(Connection::wait_settled(self))
    }
}

struct Entry {
    connection: Arc<dyn ManagedConnection>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Registry of all connections of the application.
///
/// Connections are kept in insertion order; startup and shutdown visit them
/// in that order.
#[derive(Default)]
pub struct ConnectionManager {
    entries: RwLock<Vec<Entry>>,
}

impl ConnectionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and hand it back.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyRegisteredError`] if a connection with the same name
    /// is already managed.
    pub fn add<C: ConnectionContext>(
        &self,
        connection: Arc<Connection<C>>,
    ) -> Result<Arc<Connection<C>>, AlreadyRegisteredError> {
        let mut entries = write(&self.entries);
        if entries
            .iter()
            .any(|e| e.connection.name() == connection.name())
        {
            return Err(AlreadyRegisteredError {
                kind: "Connection",
                name: connection.name().to_string(),
            });
        }
        tracing::debug!(connection = %connection.name(), "connection added");
        entries.push(Entry {
            connection: Arc::clone(&connection) as Arc<dyn ManagedConnection>,
            typed: Arc::clone(&connection) as Arc<dyn Any + Send + Sync>,
        });
        Ok(connection)
    }

    /// Look up a connection by name.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if no connection has that name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ManagedConnection>, NotFoundError> {
        read(&self.entries)
            .iter()
            .find(|e| e.connection.name() == name)
            .map(|e| Arc::clone(&e.connection))
            .ok_or_else(|| not_found(name))
    }

    /// Look up a connection by name, with its concrete context type.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if no connection has that name or if its
    /// context type is not `C`.
    pub fn get_typed<C: ConnectionContext>(
        &self,
        name: &str,
    ) -> Result<Arc<Connection<C>>, NotFoundError> {
        let typed = read(&self.entries)
            .iter()
            .find(|e| e.connection.name() == name)
            .map(|e| Arc::clone(&e.typed))
            .ok_or_else(|| not_found(name))?;
        typed
            .downcast::<Connection<C>>()
            .map_err(|_| not_found(name))
    }

    /// Names of all managed connections, in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        read(&self.entries)
            .iter()
            .map(|e| e.connection.name().to_string())
            .collect()
    }

    fn connections(&self) -> Vec<Arc<dyn ManagedConnection>> {
        read(&self.entries)
            .iter()
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    /// Notify every connection that the application has started.
    ///
    /// A connection that panics while starting is logged and skipped; the
    /// others still start.
    pub fn application_startup_complete(&self) {
        for connection in self.connections() {
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
                connection.application_startup_complete();
            }));
            if started.is_err() {
                tracing::error!(
                    connection = %connection.name(),
                    "connection failed to start"
                );
            }
        }
    }

    /// Shut every connection down and wait until all of them are idle.
    pub async fn on_application_shutdown(&self) {
        let connections = self.connections();
        for connection in &connections {
            connection.application_shutdown();
        }
        futures::future::join_all(connections.iter().map(|c| c.wait_settled())).await;
        tracing::info!(connections = connections.len(), "all connections shut down");
    }
}

fn not_found(name: &str) -> NotFoundError {
    NotFoundError {
        kind: "Connection",
        name: name.to_string(),
    }
}
