//! Connection — drives the status state machine and runs plugin rounds.
//!
//! ## Tasks
//!
//! Every connection owns a single-flight *advance task*. A pass of that task
//! repeatedly asks [`StatusTransitions`] for the next status, applies it and
//! runs the *plugin round* for it to completion before asking again. The pass
//! ends once the machine is stable.
//!
//! - [`Connection::start_advance_status`] starts a pass if none is running,
//!   otherwise it makes the running pass re-evaluate the flags before it exits.
//! - [`Connection::restart_advance_status`] aborts the running pass (dropping
//!   its in-flight plugin round, which cancels the hook at its next `.await`)
//!   and starts a fresh one.
//!
//! Passes hold a per-connection guard for their whole run. An aborted pass
//! keeps it until its future is dropped, so a fresh pass never starts a
//! round while any earlier hook is still being polled.
//!
//! ## Plugin rounds
//!
//! Hooks for the current status run one after another, highest priority
//! first. A hook that returns an error or panics sets the error flag. While
//! connecting, connected or online the rest of the round is skipped; in any
//! other status the remaining hooks still run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt as _;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use rulebridge_domain::connection_status::ConnectionStatus;
use rulebridge_domain::error::InvalidTransition;
use rulebridge_domain::status_transitions::StatusTransitions;

use super::callback::{PluginCallbackHandler, PluginInfo};
use super::plugin::{
    ConnectionContext, ConnectionPlugin, PluginError, PluginHooks, RegistrationError,
};
use crate::sync::lock;

/// Decides whether a hook error is expected noise (logged at `debug`).
pub type SilentErrorClassifier = Box<dyn Fn(&PluginError) -> bool + Send + Sync>;

/// A named, stateful link governed by the connection state machine.
pub struct Connection<C> {
    name: String,
    me: Weak<Self>,
    status: Mutex<StatusTransitions>,
    status_tx: watch::Sender<ConnectionStatus>,
    context: Mutex<Option<C>>,
    registry: Mutex<PluginRegistry<C>>,
    advance: Mutex<AdvanceSlot>,
    pass: AsyncMutex<()>,
    settled: watch::Sender<bool>,
    overview_logged: AtomicBool,
    silent_errors: Option<SilentErrorClassifier>,
}

struct PluginRegistry<C> {
    plugins: Vec<PluginInfo>,
    callbacks: HashMap<ConnectionStatus, Vec<PluginCallbackHandler<C>>>,
}

#[derive(Default)]
struct AdvanceSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
    rerun: bool,
}

impl<C: ConnectionContext> Connection<C> {
    /// Create a connection in [`ConnectionStatus::Startup`].
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// Create a connection whose hook errors matching `classifier` are logged
    /// at `debug` level instead of `error`.
    #[must_use]
    pub fn with_silent_errors(
        name: impl Into<String>,
        classifier: impl Fn(&PluginError) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::build(name.into(), Some(Box::new(classifier)))
    }

    fn build(name: String, silent_errors: Option<SilentErrorClassifier>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            me: me.clone(),
            status: Mutex::new(StatusTransitions::new()),
            status_tx: watch::channel(ConnectionStatus::Startup).0,
            context: Mutex::new(None),
            registry: Mutex::new(PluginRegistry {
                plugins: Vec::new(),
                callbacks: HashMap::new(),
            }),
            advance: Mutex::new(AdvanceSlot::default()),
            pass: AsyncMutex::new(()),
            settled: watch::channel(true).0,
            overview_logged: AtomicBool::new(false),
            silent_errors,
        })
    }

    /// Connection name, unique within a [`ConnectionManager`](super::manager::ConnectionManager).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Plugins ────────────────────────────────────────────────────

    /// Register a plugin and its hooks.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if a plugin with the same name or the
    /// same priority is already registered, or if the plugin hooks a status
    /// twice.
    pub fn register_plugin<P: ConnectionPlugin<C>>(
        &self,
        plugin: Arc<P>,
    ) -> Result<(), RegistrationError> {
        let info = PluginInfo::new(plugin.name(), plugin.priority());
        let mut hooks = PluginHooks::new(Arc::clone(&plugin), info.clone());
        plugin.register_hooks(&mut hooks);
        let handlers = hooks.finish()?;

        let mut registry = lock(&self.registry);
        for existing in &registry.plugins {
            if existing.name() == info.name() {
                return Err(RegistrationError::DuplicateName {
                    connection: self.name.clone(),
                    plugin: info.name().to_string(),
                });
            }
            if existing.priority() == info.priority() {
                return Err(RegistrationError::DuplicatePriority {
                    connection: self.name.clone(),
                    plugin: info.name().to_string(),
                    existing: existing.name().to_string(),
                    priority: info.priority(),
                });
            }
        }

        let statuses: Vec<_> = handlers.iter().map(PluginCallbackHandler::status).collect();
        for handler in handlers {
            let list = registry.callbacks.entry(handler.status()).or_default();
            list.push(handler);
            list.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        }
        registry.plugins.push(info.clone());

        tracing::debug!(
            connection = %self.name,
            plugin = info.name(),
            priority = info.priority(),
            hooks = ?statuses,
            "plugin registered"
        );
        Ok(())
    }

    /// Registered plugins, in registration order.
    #[must_use]
    pub fn plugins(&self) -> Vec<PluginInfo> {
        lock(&self.registry).plugins.clone()
    }

    /// Hooks for `status`, in the order they run.
    #[must_use]
    pub fn plugin_callbacks(&self, status: ConnectionStatus) -> Vec<PluginCallbackHandler<C>> {
        lock(&self.registry)
            .callbacks
            .get(&status)
            .cloned()
            .unwrap_or_default()
    }

    // ── Context ────────────────────────────────────────────────────

    /// Current context, if one has been set up.
    ///
    /// Plugins must re-fetch the context instead of holding on to it across
    /// `.await` points: it goes stale as soon as the connection leaves
    /// `Connected`/`Online`.
    #[must_use]
    pub fn context(&self) -> Option<C> {
        lock(&self.context).clone()
    }

    /// Replace the context. Only establishing plugins call this, during `Setup`.
    pub fn set_context(&self, context: C) {
        *lock(&self.context) = Some(context);
    }

    // ── Queries ────────────────────────────────────────────────────

    /// The current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        lock(&self.status).status()
    }

    /// Watch the current status.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status() == ConnectionStatus::Online
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Connected | ConnectionStatus::Online
        )
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Disconnected | ConnectionStatus::Offline
        )
    }

    /// `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        lock(&self.status).shutdown
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        lock(&self.status).error
    }

    // ── Stimuli ────────────────────────────────────────────────────

    /// Mark the connection as errored and make sure the state machine reacts.
    pub fn set_error(&self) {
        lock(&self.status).error = true;
        self.start_advance_status();
    }

    /// Clear the error flag. Call [`start_advance_status`](Self::start_advance_status)
    /// afterwards to let an `Offline` connection retry.
    pub fn clear_error(&self) {
        lock(&self.status).error = false;
    }

    /// Force `Setup → Disabled`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the connection is not in `Setup` or a
    /// forced transition is already queued.
    pub fn status_from_setup_to_disabled(&self) -> Result<(), InvalidTransition> {
        lock(&self.status).from_setup_to_disabled()?;
        self.start_advance_status();
        Ok(())
    }

    /// Force `Connected/Online → Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the connection is neither `Connected`
    /// nor `Online`, or a forced transition is already queued.
    pub fn status_from_connected_to_disconnected(&self) -> Result<(), InvalidTransition> {
        lock(&self.status).from_connected_to_disconnected()?;
        self.start_advance_status();
        Ok(())
    }

    /// Tear the connection down and run setup again with fresh configuration.
    pub fn status_configuration_changed(&self) {
        lock(&self.status).setup = true;
        tracing::debug!(connection = %self.name, "configuration changed");
        self.restart_advance_status();
    }

    /// Request an orderly shutdown. Repeated calls are no-ops.
    pub fn application_shutdown(&self) {
        {
            let mut status = lock(&self.status);
            if status.shutdown {
                return;
            }
            status.shutdown = true;
        }
        tracing::debug!(connection = %self.name, "shutdown requested");
        self.restart_advance_status();
    }

    /// Log the hook overview once, then kick off the first setup.
    pub fn application_startup_complete(&self) {
        if !self.overview_logged.swap(true, Ordering::AcqRel) {
            self.log_overview();
        }
        self.status_configuration_changed();
    }

    fn log_overview(&self) {
        let registry = lock(&self.registry);
        tracing::info!(
            connection = %self.name,
            plugins = registry.plugins.len(),
            "connection ready"
        );
        for status in ConnectionStatus::ALL {
            let Some(handlers) = registry.callbacks.get(&status) else {
                continue;
            };
            let names: Vec<_> = handlers.iter().map(PluginCallbackHandler::plugin_name).collect();
            tracing::debug!(
                connection = %self.name,
                hook = status.hook_name(),
                plugins = %names.join(", "),
                "registered hooks"
            );
        }
    }

    // ── Advance task ───────────────────────────────────────────────

    /// Start the advance task unless it is already running.
    ///
    /// A running pass is told to re-evaluate the flags before it exits, so no
    /// request made while it runs is lost. Must be called within a Tokio
    /// runtime.
    pub fn start_advance_status(&self) {
        let mut slot = lock(&self.advance);
        slot.rerun = true;
        if slot.handle.is_none() {
            self.spawn_advance(&mut slot);
        }
    }

    /// Abort the running advance pass, if any, and start a fresh one.
    ///
    /// The aborted pass drops its in-flight plugin round; the cancelled hook
    /// does not count as an error. The fresh pass waits until every aborted
    /// pass is gone. Must be called within a Tokio runtime.
    pub fn restart_advance_status(&self) {
        let mut slot = lock(&self.advance);
        slot.rerun = true;
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        self.spawn_advance(&mut slot);
    }

    /// Resolve once no advance pass is running.
    pub async fn wait_settled(&self) {
        let mut settled = self.settled.subscribe();
        // the sender lives in `self`, so this cannot fail while we borrow it
        let _ = settled.wait_for(|settled| *settled).await;
    }

    /// `true` while an advance pass is running.
    #[must_use]
    pub fn is_advancing(&self) -> bool {
        !*self.settled.borrow()
    }

    fn spawn_advance(&self, slot: &mut AdvanceSlot) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        slot.generation += 1;
        self.settled.send_replace(false);
        let span = tracing::info_span!("connection", name = %self.name);
        slot.handle = Some(tokio::spawn(
            this.run_advance(slot.generation).instrument(span),
        ));
    }

    async fn run_advance(self: Arc<Self>, generation: u64) {
        // released only when the pass future is dropped, aborted or not
        let _pass = self.pass.lock().await;

        loop {
            {
                let mut slot = lock(&self.advance);
                if slot.generation != generation {
                    return;
                }
                if !slot.rerun {
                    slot.handle = None;
                    self.settled.send_replace(true);
                    return;
                }
                slot.rerun = false;
            }

            while let Some((from, to)) = self.next_status() {
                tracing::info!(connection = %self.name, %from, %to, "status changed");
                self.status_tx.send_replace(to);
                self.run_plugin_round(to).await;
            }
        }
    }

    fn next_status(&self) -> Option<(ConnectionStatus, ConnectionStatus)> {
        let mut status = lock(&self.status);
        let from = status.status();
        let to = status.advance_status()?;
        if to == ConnectionStatus::Setup {
            // setup rebuilds the context from scratch
            status.error = false;
        }
        Some((from, to))
    }

    async fn run_plugin_round(self: &Arc<Self>, status: ConnectionStatus) {
        let handlers = self.plugin_callbacks(status);

        for handler in handlers {
            let hook = handler.run(Arc::clone(self), self.context());
            let err = match AssertUnwindSafe(hook).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => PluginError::from_panic(payload.as_ref()),
            };

            self.report_hook_error(&handler, &err);
            self.set_error();

            if self.status().is_connecting_or_connected() {
                tracing::debug!(
                    connection = %self.name,
                    %status,
                    "skipping remaining plugins of this round"
                );
                break;
            }
        }
    }

    fn report_hook_error(&self, handler: &PluginCallbackHandler<C>, err: &PluginError) {
        let silent = self
            .silent_errors
            .as_ref()
            .is_some_and(|is_silent| is_silent(err));
        if silent {
            tracing::debug!(
                connection = %self.name,
                plugin = handler.plugin_name(),
                hook = handler.status().hook_name(),
                error = %err,
                "plugin hook failed"
            );
        } else {
            tracing::error!(
                connection = %self.name,
                plugin = handler.plugin_name(),
                hook = handler.status().hook_name(),
                error = ?err,
                "plugin hook failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::connection::plugin::{HookArgs, HookResult};
    use ConnectionStatus::*;

    // ── Test plugins ───────────────────────────────────────────────

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records `<name>:<status>` for every hook call; fails on `fail_on`.
    struct Recorder {
        name: String,
        priority: i32,
        statuses: Vec<ConnectionStatus>,
        fail_on: Option<ConnectionStatus>,
        journal: Journal,
    }

    impl Recorder {
        fn new(
            name: &str,
            priority: i32,
            statuses: &[ConnectionStatus],
            journal: &Journal,
        ) -> Self {
            Self {
                name: name.to_string(),
                priority,
                statuses: statuses.to_vec(),
                fail_on: None,
                journal: Arc::clone(journal),
            }
        }

        fn failing_on(mut self, status: ConnectionStatus) -> Self {
            self.fail_on = Some(status);
            self
        }

        async fn record(self: Arc<Self>, args: HookArgs<String>) -> HookResult {
            let status = args.connection.status();
            lock(&self.journal).push(format!("{}:{status}", self.name));
            if self.fail_on == Some(status) {
                return Err(PluginError::failed(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    impl ConnectionPlugin<String> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
            for &status in &self.statuses {
                hooks.on(status, Self::record);
            }
        }
    }

    /// Establishes the context during setup.
    struct SessionPlugin;

    impl SessionPlugin {
        async fn on_setup(self: Arc<Self>, args: HookArgs<String>) -> HookResult {
            args.connection.set_context("session-1".to_string());
            Ok(())
        }

        async fn on_connecting(self: Arc<Self>, args: HookArgs<String>) -> HookResult {
            match args.context {
                Some(_) => Ok(()),
                None => Err(PluginError::MissingContext),
            }
        }
    }

    impl ConnectionPlugin<String> for SessionPlugin {
        fn name(&self) -> &str {
            "session"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
            hooks
                .on(Setup, Self::on_setup)
                .on(Connecting, Self::on_connecting);
        }
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        lock(journal).clone()
    }

    async fn settle(connection: &Connection<String>) {
        tokio::time::timeout(Duration::from_secs(5), connection.wait_settled())
            .await
            .expect("connection should settle");
    }

    // ── Registration ───────────────────────────────────────────────

    #[test]
    fn should_reject_duplicate_plugin_name() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new("a", 1, &[Online], &j)))
            .unwrap();

        let err = connection
            .register_plugin(Arc::new(Recorder::new("a", 2, &[Online], &j)))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateName { .. }));
    }

    #[test]
    fn should_reject_duplicate_priority() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new("a", 1, &[Online], &j)))
            .unwrap();

        let err = connection
            .register_plugin(Arc::new(Recorder::new("b", 1, &[Setup], &j)))
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::DuplicatePriority {
                connection: "test".to_string(),
                plugin: "b".to_string(),
                existing: "a".to_string(),
                priority: 1,
            }
        );
        assert!(connection.plugin_callbacks(Setup).is_empty());
        assert_eq!(connection.plugins(), vec![PluginInfo::new("a", 1)]);
    }

    #[test]
    fn should_list_one_handler_per_implemented_status() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new("a", 1, &[Setup, Online], &j)))
            .unwrap();

        for status in ConnectionStatus::ALL {
            let expected = usize::from(matches!(status, Setup | Online));
            assert_eq!(
                connection.plugin_callbacks(status).len(),
                expected,
                "{status}"
            );
        }
    }

    #[test]
    fn should_sort_handlers_by_priority_descending() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        for (name, priority) in [("ten", 10), ("minus-five", -5), ("thousand", 1000)] {
            connection
                .register_plugin(Arc::new(Recorder::new(name, priority, &[Connected], &j)))
                .unwrap();
        }

        let order: Vec<_> = connection
            .plugin_callbacks(Connected)
            .iter()
            .map(PluginCallbackHandler::priority)
            .collect();
        assert_eq!(order, vec![1000, 10, -5]);
    }

    // ── Rounds ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn should_run_hooks_in_priority_order() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        for (name, priority) in [("ten", 10), ("minus-five", -5), ("thousand", 1000)] {
            connection
                .register_plugin(Arc::new(Recorder::new(name, priority, &[Connected], &j)))
                .unwrap();
        }

        connection.application_startup_complete();
        settle(&connection).await;

        assert_eq!(
            entries(&j),
            vec!["thousand:connected", "ten:connected", "minus-five:connected"]
        );
    }

    #[tokio::test]
    async fn should_skip_remaining_hooks_when_failing_while_connecting() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new("p1", 4, &[Connecting], &j)))
            .unwrap();
        connection
            .register_plugin(Arc::new(
                Recorder::new("p2", 3, &[Connecting], &j).failing_on(Connecting),
            ))
            .unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("p3", 2, &[Connecting], &j)))
            .unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("p4", 1, &[Connecting], &j)))
            .unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert_eq!(entries(&j), vec!["p1:connecting", "p2:connecting"]);
        assert!(connection.has_errors());
        assert_eq!(connection.status(), Offline);
    }

    #[tokio::test]
    async fn should_run_all_hooks_when_failing_during_setup() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new("p1", 4, &[Setup], &j)))
            .unwrap();
        connection
            .register_plugin(Arc::new(
                Recorder::new("p2", 3, &[Setup], &j).failing_on(Setup),
            ))
            .unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("p3", 2, &[Setup], &j)))
            .unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("p4", 1, &[Setup], &j)))
            .unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert_eq!(
            entries(&j),
            vec!["p1:setup", "p2:setup", "p3:setup", "p4:setup"]
        );
        assert!(connection.has_errors());
        assert_eq!(connection.status(), Disabled);
    }

    #[tokio::test]
    async fn should_treat_panicking_hook_as_error() {
        struct Panicking;

        impl Panicking {
            async fn on_connected(self: Arc<Self>, _args: HookArgs<String>) -> HookResult {
                panic!("hook exploded");
            }
        }

        impl ConnectionPlugin<String> for Panicking {
            fn name(&self) -> &str {
                "panicking"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Connected, Self::on_connected);
            }
        }

        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(Panicking)).unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert!(connection.has_errors());
        assert_eq!(connection.status(), Offline);
    }

    #[tokio::test]
    async fn should_report_silent_errors_like_any_other_error() {
        let connection = Connection::<String>::with_silent_errors("test", |err| {
            matches!(err, PluginError::Failed(_))
        });
        let j = journal();
        connection
            .register_plugin(Arc::new(
                Recorder::new("refused", 0, &[Connecting], &j).failing_on(Connecting),
            ))
            .unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert!(connection.has_errors());
        assert!(connection.is_disconnected());
    }

    // ── End to end ─────────────────────────────────────────────────

    #[tokio::test]
    async fn should_come_online_with_context_after_startup() {
        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(SessionPlugin)).unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert!(connection.is_online());
        assert!(connection.is_connected());
        assert_eq!(connection.context().as_deref(), Some("session-1"));
        assert!(!connection.has_errors());
    }

    #[tokio::test]
    async fn should_reconnect_after_forced_disconnect() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(Recorder::new(
                "observer",
                0,
                &[Disconnected, Offline, Connecting, Online],
                &j,
            )))
            .unwrap();

        connection.application_startup_complete();
        settle(&connection).await;
        lock(&j).clear();

        connection.status_from_connected_to_disconnected().unwrap();
        settle(&connection).await;

        assert_eq!(
            entries(&j),
            vec![
                "observer:disconnected",
                "observer:offline",
                "observer:connecting",
                "observer:online"
            ]
        );
        assert!(!connection.has_errors());
        assert!(connection.is_online());
    }

    #[tokio::test]
    async fn should_reject_forced_disconnect_before_connecting() {
        let connection = Connection::<String>::new("test");
        assert!(connection.status_from_connected_to_disconnected().is_err());
        assert!(!connection.is_advancing());
    }

    #[tokio::test]
    async fn should_disable_when_setup_plugin_requests_it() {
        struct Disabler;

        impl Disabler {
            async fn on_setup(self: Arc<Self>, args: HookArgs<String>) -> HookResult {
                args.connection
                    .status_from_setup_to_disabled()
                    .map_err(|err| PluginError::Domain(err.into()))
            }
        }

        impl ConnectionPlugin<String> for Disabler {
            fn name(&self) -> &str {
                "disabler"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Setup, Self::on_setup);
            }
        }

        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(Disabler)).unwrap();

        connection.application_startup_complete();
        settle(&connection).await;

        assert_eq!(connection.status(), Disabled);
        assert!(!connection.has_errors());
    }

    #[tokio::test]
    async fn should_shut_down_and_stay_shut_down() {
        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(SessionPlugin)).unwrap();
        connection.application_startup_complete();
        settle(&connection).await;

        connection.application_shutdown();
        settle(&connection).await;
        assert_eq!(connection.status(), Shutdown);
        assert!(connection.is_shutdown());

        connection.set_error();
        connection.status_configuration_changed();
        settle(&connection).await;
        assert_eq!(connection.status(), Shutdown);
    }

    #[tokio::test]
    async fn should_rebuild_context_after_configuration_change() {
        let connection = Connection::<String>::new("test");
        let j = journal();
        connection.register_plugin(Arc::new(SessionPlugin)).unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("observer", -1, &[Setup], &j)))
            .unwrap();

        connection.application_startup_complete();
        settle(&connection).await;
        connection.status_configuration_changed();
        settle(&connection).await;

        assert_eq!(entries(&j), vec!["observer:setup", "observer:setup"]);
        assert!(connection.is_online());
    }

    #[tokio::test]
    async fn should_publish_status_changes_to_watchers() {
        let connection = Connection::<String>::new("test");
        let mut status = connection.subscribe_status();
        assert_eq!(*status.borrow(), Startup);

        connection.application_startup_complete();
        settle(&connection).await;

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), Online);
    }

    // ── Task semantics ─────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_settle_once_under_concurrent_requests() {
        let connection = Connection::<String>::new("test");
        let setups = Arc::new(AtomicUsize::new(0));

        struct CountSetups(Arc<AtomicUsize>);

        impl CountSetups {
            async fn on_setup(self: Arc<Self>, _args: HookArgs<String>) -> HookResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(())
            }
        }

        impl ConnectionPlugin<String> for CountSetups {
            fn name(&self) -> &str {
                "count"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Setup, Self::on_setup);
            }
        }

        connection
            .register_plugin(Arc::new(CountSetups(Arc::clone(&setups))))
            .unwrap();
        connection.application_startup_complete();

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        connection.set_error();
                    } else {
                        connection.clear_error();
                    }
                    connection.start_advance_status();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        // an error raised during setup parks the connection in `disabled`
        connection.status_configuration_changed();
        settle(&connection).await;

        assert!(connection.is_online(), "status: {}", connection.status());
        assert!(!connection.is_advancing());
        assert!(setups.load(Ordering::SeqCst) >= 1);

        // a last request after everything settled is still honoured
        connection.application_shutdown();
        settle(&connection).await;
        assert_eq!(connection.status(), Shutdown);
    }

    #[tokio::test]
    async fn should_cancel_blocked_round_on_shutdown_without_error() {
        struct Hanging;

        impl Hanging {
            async fn on_connecting(self: Arc<Self>, _args: HookArgs<String>) -> HookResult {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        impl ConnectionPlugin<String> for Hanging {
            fn name(&self) -> &str {
                "hanging"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Connecting, Self::on_connecting);
            }
        }

        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(Hanging)).unwrap();
        let mut status = connection.subscribe_status();

        connection.application_startup_complete();
        status
            .wait_for(|s| *s == Connecting)
            .await
            .expect("sender alive");
        assert!(connection.is_advancing());

        connection.application_shutdown();
        settle(&connection).await;

        assert_eq!(connection.status(), Shutdown);
        assert!(!connection.has_errors());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_not_overlap_rounds_when_restarts_are_chained() {
        struct BlockingConnect(Journal);

        impl BlockingConnect {
            async fn on_connecting(self: Arc<Self>, _args: HookArgs<String>) -> HookResult {
                lock(&self.0).push("connecting:enter".to_string());
                // keeps a worker busy inside a single poll
                std::thread::sleep(Duration::from_millis(500));
                lock(&self.0).push("connecting:exit".to_string());
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        impl ConnectionPlugin<String> for BlockingConnect {
            fn name(&self) -> &str {
                "blocking-connect"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Connecting, Self::on_connecting);
            }
        }

        let connection = Connection::<String>::new("test");
        let j = journal();
        connection
            .register_plugin(Arc::new(BlockingConnect(Arc::clone(&j))))
            .unwrap();
        connection
            .register_plugin(Arc::new(Recorder::new("observer", -1, &[Disconnected], &j)))
            .unwrap();

        connection.application_startup_complete();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !entries(&j).iter().any(|entry| entry == "connecting:enter") {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("connecting hook should start");

        connection.status_configuration_changed();
        connection.application_shutdown();
        settle(&connection).await;

        assert_eq!(
            entries(&j),
            vec![
                "connecting:enter",
                "connecting:exit",
                "observer:disconnected"
            ]
        );
        assert_eq!(connection.status(), Shutdown);
        assert!(!connection.has_errors());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_honour_last_request_made_while_a_pass_runs() {
        struct Gate(watch::Receiver<bool>);

        impl Gate {
            async fn on_connecting(self: Arc<Self>, _args: HookArgs<String>) -> HookResult {
                let mut open = self.0.clone();
                let _ = open.wait_for(|open| *open).await;
                Ok(())
            }
        }

        impl ConnectionPlugin<String> for Gate {
            fn name(&self) -> &str {
                "gate"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn register_hooks(&self, hooks: &mut PluginHooks<Self, String>) {
                hooks.on(Connecting, Self::on_connecting);
            }
        }

        let (gate_tx, gate_rx) = watch::channel(false);
        let connection = Connection::<String>::new("test");
        connection.register_plugin(Arc::new(Gate(gate_rx))).unwrap();
        let mut status = connection.subscribe_status();

        connection.application_startup_complete();
        status
            .wait_for(|s| *s == Connecting)
            .await
            .expect("sender alive");

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        connection.set_error();
                    } else {
                        connection.clear_error();
                    }
                    connection.start_advance_status();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(connection.is_advancing());

        connection.set_error();
        gate_tx.send_replace(true);
        settle(&connection).await;

        assert_eq!(connection.status(), Offline);
        assert!(connection.has_errors());

        connection.clear_error();
        connection.start_advance_status();
        settle(&connection).await;

        assert!(connection.is_online(), "status: {}", connection.status());
        assert!(!connection.has_errors());
    }
}
