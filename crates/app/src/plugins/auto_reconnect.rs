//! Reconnects an errored connection with exponential back-off.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use rulebridge_domain::connection_status::ConnectionStatus;

use crate::connection::{ConnectionContext, ConnectionPlugin, HookArgs, HookResult, PluginHooks};
use crate::sync::lock;

/// Default upper bound of the back-off delay.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

const FIRST_WAIT: Duration = Duration::from_secs(1);
const DOUBLING_LIMIT: Duration = Duration::from_secs(16);

/// Waits with a growing delay whenever the connection goes offline because of
/// an error, then clears the error and lets the connection try again.
///
/// The delay starts at one second, doubles until it reaches sixteen seconds and
/// grows by half from there, never exceeding the configured maximum. Coming
/// online resets it and drops any wait still pending.
pub struct AutoReconnectPlugin {
    max_wait: Duration,
    state: Mutex<BackoffState>,
}

#[derive(Default)]
struct BackoffState {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl AutoReconnectPlugin {
    /// Runs after every other plugin, including the event bus one.
    pub const PRIORITY: i32 = -100_001;

    /// Create the plugin with a custom maximum delay.
    #[must_use]
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            state: Mutex::new(BackoffState::default()),
        }
    }

    /// The delay used for the most recent wait, zero after a reset.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        lock(&self.state).delay
    }

    async fn on_online<C: ConnectionContext>(self: Arc<Self>, _args: HookArgs<C>) -> HookResult {
        let mut state = lock(&self.state);
        state.delay = Duration::ZERO;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        Ok(())
    }

    async fn on_offline<C: ConnectionContext>(self: Arc<Self>, args: HookArgs<C>) -> HookResult {
        let connection = args.connection;
        if connection.is_shutdown() || !connection.has_errors() {
            return Ok(());
        }

        let delay = {
            let mut state = lock(&self.state);
            state.delay = next_delay(state.delay, self.max_wait);
            state.delay
        };
        tracing::info!(
            connection = %connection.name(),
            delay_secs = delay.as_secs_f64(),
            "reconnecting after back-off"
        );

        let weak = Arc::downgrade(&connection);
        let wait = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(connection) = weak.upgrade() else {
                return;
            };
            if connection.is_shutdown() {
                return;
            }
            connection.clear_error();
            connection.start_advance_status();
        });

        if let Some(previous) = lock(&self.state).pending.replace(wait) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_wait<C: ConnectionContext>(self: Arc<Self>, args: HookArgs<C>) -> HookResult {
        if let Some(pending) = lock(&self.state).pending.take() {
            pending.abort();
            tracing::debug!(connection = %args.connection.name(), "pending reconnect cancelled");
        }
        Ok(())
    }
}

impl Default for AutoReconnectPlugin {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WAIT)
    }
}

impl<C: ConnectionContext> ConnectionPlugin<C> for AutoReconnectPlugin {
    fn name(&self) -> &str {
        "auto-reconnect"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn register_hooks(&self, hooks: &mut PluginHooks<Self, C>) {
        hooks
            .on(ConnectionStatus::Online, Self::on_online)
            .on(ConnectionStatus::Offline, Self::on_offline)
            .on(ConnectionStatus::Setup, Self::cancel_wait)
            .on(ConnectionStatus::Shutdown, Self::cancel_wait);
    }
}

fn next_delay(current: Duration, max_wait: Duration) -> Duration {
    let next = if current.is_zero() {
        FIRST_WAIT
    } else if current < DOUBLING_LIMIT {
        current * 2
    } else {
        current.mul_f64(1.5)
    };
    next.min(max_wait)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::connection::{Connection, PluginError};
    use ConnectionStatus::*;

    #[test]
    fn should_double_then_grow_by_half_up_to_max() {
        let mut delay = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..14 {
            delay = next_delay(delay, DEFAULT_MAX_WAIT);
            seen.push(delay.as_secs_f64());
        }
        assert_eq!(
            seen,
            vec![
                1.0, 2.0, 4.0, 8.0, 16.0, 24.0, 36.0, 54.0, 81.0, 121.5, 182.25, 273.375, 300.0,
                300.0
            ]
        );
    }

    #[test]
    fn should_cap_first_delay_at_max() {
        let max = Duration::from_millis(500);
        assert_eq!(next_delay(Duration::ZERO, max), max);
    }

    /// Fails `Connecting` a given number of times and records when it was tried.
    struct FlakyConnect {
        failures_left: AtomicUsize,
        started: Instant,
        attempts: Mutex<Vec<u64>>,
    }

    impl FlakyConnect {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                started: Instant::now(),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<u64> {
            lock(&self.attempts).clone()
        }

        async fn on_connecting(self: Arc<Self>, _args: HookArgs<()>) -> HookResult {
            lock(&self.attempts).push(self.started.elapsed().as_secs());
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(PluginError::failed("connection refused"));
            }
            Ok(())
        }
    }

    impl ConnectionPlugin<()> for FlakyConnect {
        fn name(&self) -> &str {
            "flaky"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn register_hooks(&self, hooks: &mut PluginHooks<Self, ()>) {
            hooks.on(Connecting, Self::on_connecting);
        }
    }

    fn connection_with(
        flaky: &Arc<FlakyConnect>,
        reconnect: &Arc<AutoReconnectPlugin>,
    ) -> Arc<Connection<()>> {
        let connection = Connection::new("test");
        connection.register_plugin(Arc::clone(flaky)).unwrap();
        connection.register_plugin(Arc::clone(reconnect)).unwrap();
        connection
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_with_growing_delay_until_online() {
        let flaky = Arc::new(FlakyConnect::new(3));
        let reconnect = Arc::new(AutoReconnectPlugin::default());
        let connection = connection_with(&flaky, &reconnect);
        let mut status = connection.subscribe_status();

        connection.application_startup_complete();
        status.wait_for(|s| *s == Online).await.unwrap();

        assert_eq!(flaky.attempts(), vec![0, 1, 3, 7]);
        assert!(!connection.has_errors());
        assert_eq!(reconnect.current_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_wait_when_offline_without_error() {
        let flaky = Arc::new(FlakyConnect::new(0));
        let reconnect = Arc::new(AutoReconnectPlugin::default());
        let connection = connection_with(&flaky, &reconnect);

        connection.application_startup_complete();
        connection.wait_settled().await;
        connection.status_from_connected_to_disconnected().unwrap();
        connection.wait_settled().await;

        assert!(connection.is_online());
        assert_eq!(reconnect.current_delay(), Duration::ZERO);
        assert_eq!(flaky.attempts(), vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_drop_pending_wait_when_online_again() {
        let flaky = Arc::new(FlakyConnect::new(1));
        let reconnect = Arc::new(AutoReconnectPlugin::default());
        let connection = connection_with(&flaky, &reconnect);

        connection.application_startup_complete();
        connection.wait_settled().await;
        assert_eq!(connection.status(), Offline);
        assert!(lock(&reconnect.state).pending.is_some());

        // back online without waiting for the back-off
        connection.clear_error();
        connection.start_advance_status();
        connection.wait_settled().await;
        assert!(connection.is_online());
        assert!(lock(&reconnect.state).pending.is_none());
        assert_eq!(reconnect.current_delay(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(connection.is_online());
        assert_eq!(flaky.attempts(), vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_pending_wait_on_shutdown() {
        let flaky = Arc::new(FlakyConnect::new(usize::MAX));
        let reconnect = Arc::new(AutoReconnectPlugin::default());
        let connection = connection_with(&flaky, &reconnect);

        connection.application_startup_complete();
        connection.wait_settled().await;
        assert_eq!(connection.status(), Offline);
        assert_eq!(reconnect.current_delay(), Duration::from_secs(1));

        connection.application_shutdown();
        connection.wait_settled().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connection.status(), Shutdown);
        assert_eq!(flaky.attempts(), vec![0]);
    }
}
