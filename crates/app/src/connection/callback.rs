//! Plugin callback handler — a plugin hook bound at registration time.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rulebridge_domain::connection_status::ConnectionStatus;

use super::lifecycle::Connection;
use super::plugin::{HookArgs, HookResult};

/// Boxed future returned by a type-erased hook.
pub type HookFuture = Pin<Box<dyn Future<Output = HookResult> + Send>>;

type BoundHook<C> = Arc<dyn Fn(HookArgs<C>) -> HookFuture + Send + Sync>;

/// Name and priority of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    name: Arc<str>,
    priority: i32,
}

impl PluginInfo {
    /// Describe a plugin.
    #[must_use]
    pub fn new(name: &str, priority: i32) -> Self {
        Self {
            name: Arc::from(name),
            priority,
        }
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin priority, higher runs first.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// One plugin's hook for one status.
///
/// Cheap to clone; the plugin round clones the handler list before running it
/// so registration never blocks on a running round.
pub struct PluginCallbackHandler<C> {
    plugin: PluginInfo,
    status: ConnectionStatus,
    hook: BoundHook<C>,
}

impl<C> Clone for PluginCallbackHandler<C> {
    fn clone(&self) -> Self {
        Self {
            plugin: self.plugin.clone(),
            status: self.status,
            hook: Arc::clone(&self.hook),
        }
    }
}

impl<C> fmt::Debug for PluginCallbackHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCallbackHandler")
            .field("plugin", &self.plugin.name())
            .field("priority", &self.plugin.priority())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<C: 'static> PluginCallbackHandler<C> {
    /// Bind an async hook of `plugin` to `status`.
    pub fn create<F, Fut>(plugin: PluginInfo, status: ConnectionStatus, hook: F) -> Self
    where
        F: Fn(HookArgs<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Self {
            plugin,
            status,
            hook: Arc::new(move |args| Box::pin(hook(args)) as HookFuture),
        }
    }

    /// Invoke the hook.
    pub fn run(&self, connection: Arc<Connection<C>>, context: Option<C>) -> HookFuture {
        (self.hook)(HookArgs {
            connection,
            context,
        })
    }

    /// The plugin this hook belongs to.
    #[must_use]
    pub fn plugin(&self) -> &PluginInfo {
        &self.plugin
    }

    /// Name of the owning plugin.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Priority of the owning plugin.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.plugin.priority()
    }

    /// The status this hook reacts to.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }
}
