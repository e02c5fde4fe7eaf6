//! Plugin extension point — the trait plugins implement and the hook map they fill.
//!
//! A plugin declares the statuses it reacts to by registering one async hook
//! per status on a [`PluginHooks`] map. Every hook receives the same
//! [`HookArgs`] and simply ignores what it does not need.
//!
//! ```ignore
//! impl<C: ConnectionContext> ConnectionPlugin<C> for MyPlugin {
//!     fn name(&self) -> &str { "my-plugin" }
//!     fn priority(&self) -> i32 { 10 }
//!     fn register_hooks(&self, hooks: &mut PluginHooks<Self, C>) {
//!         hooks
//!             .on(ConnectionStatus::Setup, Self::on_setup)
//!             .on(ConnectionStatus::Online, Self::on_online);
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use rulebridge_domain::connection_status::ConnectionStatus;
use rulebridge_domain::error::BridgeError;

use super::callback::{PluginCallbackHandler, PluginInfo};
use super::lifecycle::Connection;

/// Bounds every connection context must satisfy.
///
/// The context is an opaque, plugin-managed handle (a client, a session, …)
/// that is cloned out of the connection for each hook call.
pub trait ConnectionContext: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> ConnectionContext for T {}

/// Outcome of a plugin hook.
pub type HookResult = Result<(), PluginError>;

/// Arguments passed to every plugin hook.
pub struct HookArgs<C> {
    /// The connection the hook runs for.
    pub connection: Arc<Connection<C>>,
    /// Snapshot of the connection context at the time the hook was called.
    pub context: Option<C>,
}

/// Error reported by a plugin hook.
///
/// Any error marks the connection as errored; see
/// [`Connection`] for how the remaining hooks of the round are treated.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The hook failed with an error from an external collaborator.
    #[error("plugin hook failed")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The hook needs a context but none has been set up.
    #[error("connection context is not available")]
    MissingContext,

    /// The hook panicked.
    #[error("plugin hook panicked: {0}")]
    Panicked(String),

    /// A domain-level error (invalid transition, …).
    #[error("domain error")]
    Domain(#[from] BridgeError),
}

impl PluginError {
    /// Wrap any error as a hook failure.
    pub fn failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Failed(err.into())
    }

    /// Build a [`PluginError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

/// A unit of logic reacting to connection status changes.
///
/// `name` and `priority` must both be unique among the plugins registered on
/// one connection. For a given status, hooks of plugins with a higher priority
/// run first. Cross-cutting built-ins use very negative priorities so they run
/// last.
pub trait ConnectionPlugin<C: ConnectionContext>: Send + Sync + Sized + 'static {
    /// Name used in logs and for duplicate detection.
    fn name(&self) -> &str;

    /// Ordering key, higher runs first.
    fn priority(&self) -> i32;

    /// Declare the hooks of this plugin.
    fn register_hooks(&self, hooks: &mut PluginHooks<Self, C>);
}

/// Hook map filled by [`ConnectionPlugin::register_hooks`].
pub struct PluginHooks<P, C> {
    plugin: Arc<P>,
    info: PluginInfo,
    handlers: Vec<PluginCallbackHandler<C>>,
    duplicate: Option<ConnectionStatus>,
}

impl<P, C> PluginHooks<P, C>
where
    P: Send + Sync + 'static,
    C: ConnectionContext,
{
    pub(crate) fn new(plugin: Arc<P>, info: PluginInfo) -> Self {
        Self {
            plugin,
            info,
            handlers: Vec::new(),
            duplicate: None,
        }
    }

    /// Register `hook` to run whenever the connection enters `status`.
    ///
    /// Registering a second hook for the same status is reported as
    /// [`RegistrationError::DuplicateHook`] when the plugin is registered.
    pub fn on<F, Fut>(&mut self, status: ConnectionStatus, hook: F) -> &mut Self
    where
        F: Fn(Arc<P>, HookArgs<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        if self.handlers.iter().any(|h| h.status() == status) {
            self.duplicate.get_or_insert(status);
            return self;
        }
        let plugin = Arc::clone(&self.plugin);
        self.handlers.push(PluginCallbackHandler::create(
            self.info.clone(),
            status,
            move |args| hook(Arc::clone(&plugin), args),
        ));
        self
    }

    /// Statuses a hook has been registered for so far.
    pub fn statuses(&self) -> impl Iterator<Item = ConnectionStatus> + '_ {
        self.handlers.iter().map(PluginCallbackHandler::status)
    }

    pub(crate) fn finish(self) -> Result<Vec<PluginCallbackHandler<C>>, RegistrationError> {
        match self.duplicate {
            Some(status) => Err(RegistrationError::DuplicateHook {
                plugin: self.info.name().to_string(),
                status,
            }),
            None => Ok(self.handlers),
        }
    }
}

/// A plugin could not be registered on a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Another plugin with the same name is already registered.
    #[error("plugin '{plugin}' is already registered on connection '{connection}'")]
    DuplicateName {
        /// Connection name.
        connection: String,
        /// Plugin name.
        plugin: String,
    },

    /// Another plugin already uses this priority.
    #[error(
        "priority {priority} of plugin '{plugin}' is already used by '{existing}' on connection '{connection}'"
    )]
    DuplicatePriority {
        /// Connection name.
        connection: String,
        /// Plugin being registered.
        plugin: String,
        /// Plugin holding the priority.
        existing: String,
        /// The contested priority.
        priority: i32,
    },

    /// The plugin registered two hooks for one status.
    #[error("plugin '{plugin}' registered more than one hook for {status}")]
    DuplicateHook {
        /// Plugin name.
        plugin: String,
        /// The status hooked twice.
        status: ConnectionStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    async fn noop(_plugin: Arc<Noop>, _args: HookArgs<()>) -> HookResult {
        Ok(())
    }

    fn hooks() -> PluginHooks<Noop, ()> {
        PluginHooks::new(Arc::new(Noop), PluginInfo::new("noop", 0))
    }

    #[test]
    fn should_collect_one_handler_per_status() {
        let mut hooks = hooks();
        hooks
            .on(ConnectionStatus::Setup, noop)
            .on(ConnectionStatus::Online, noop);

        let statuses: Vec<_> = hooks.statuses().collect();
        assert_eq!(
            statuses,
            vec![ConnectionStatus::Setup, ConnectionStatus::Online]
        );
        assert_eq!(hooks.finish().unwrap().len(), 2);
    }

    #[test]
    fn should_reject_second_hook_for_same_status() {
        let mut hooks = hooks();
        hooks
            .on(ConnectionStatus::Online, noop)
            .on(ConnectionStatus::Online, noop);

        let err = hooks.finish().unwrap_err();
        assert_eq!(
            err,
            RegistrationError::DuplicateHook {
                plugin: "noop".to_string(),
                status: ConnectionStatus::Online,
            }
        );
    }

    #[test]
    fn should_describe_panic_payloads() {
        let err = PluginError::from_panic(&"boom");
        assert_eq!(err.to_string(), "plugin hook panicked: boom");

        let err = PluginError::from_panic(&String::from("owned boom"));
        assert_eq!(err.to_string(), "plugin hook panicked: owned boom");

        let err = PluginError::from_panic(&42_u8);
        assert_eq!(err.to_string(), "plugin hook panicked: unknown panic payload");
    }

    #[test]
    fn should_display_duplicate_priority() {
        let err = RegistrationError::DuplicatePriority {
            connection: "mqtt".to_string(),
            plugin: "b".to_string(),
            existing: "a".to_string(),
            priority: 10,
        };
        assert_eq!(
            err.to_string(),
            "priority 10 of plugin 'b' is already used by 'a' on connection 'mqtt'"
        );
    }
}
