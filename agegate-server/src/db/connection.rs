//! Connection manager - owns the single shared store handle
//!
//! - `connect` is single-flight: callers arriving during an attempt poll
//!   until it finishes and share its outcome.
//! - Failure signals from the live handle and disconnected handles seen by
//!   `handle` start a background reconnection loop with capped exponential
//!   backoff. Only one loop runs at a time.
//! - Reconnection failures are logged, never returned to unrelated callers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::store::{Connector, FailureSignal, Store, StoreError};

/// Default interval at which waiting callers re-check an in-flight attempt
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Connection manager error type
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("database not initialized, call connect first")]
    NotInitialized,

    #[error("database connection unavailable")]
    Unavailable,

    #[error("connection manager was closed")]
    Closed,

    #[error("failed to connect to database: {0}")]
    Connect(#[source] StoreError),

    #[error("failed to close database connection: {0}")]
    Close(#[source] StoreError),
}

/// Lifecycle of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PermanentlyFailed,
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::PermanentlyFailed => "permanently_failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for the manager
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub backoff: BackoffPolicy,
    pub poll_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct ConnectionState {
    handle: Option<Arc<dyn Store>>,
    /// Bumped for every established handle
    generation: u64,
    retry_count: u32,
    status: ConnectionStatus,
    /// Set once a connect succeeded, cleared by `close`
    initialized: bool,
    /// Bumped by every `close`; attempts started before it are discarded
    epoch: u64,
    supervisor: Option<JoinHandle<()>>,
}

/// Owns the store handle and drives reconnection.
///
/// Always used behind an `Arc` so background tasks can hold it.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    options: ManagerOptions,
    state: Mutex<ConnectionState>,
    connecting: AtomicBool,
    reconnecting: AtomicBool,
}

/// Clears a flag when dropped so every exit path releases it.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ConnectionManager {
    pub fn new(connector: impl Connector) -> Arc<Self> {
        Self::with_options(connector, ManagerOptions::default())
    }

    pub fn with_options(connector: impl Connector, options: ManagerOptions) -> Arc<Self> {
        Arc::new(Self {
            connector: Box::new(connector),
            options,
            state: Mutex::new(ConnectionState {
                handle: None,
                generation: 0,
                retry_count: 0,
                status: ConnectionStatus::Disconnected,
                initialized: false,
                epoch: 0,
                supervisor: None,
            }),
            connecting: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    /// Consecutive failed reconnection attempts since the last success
    pub fn retry_count(&self) -> u32 {
        self.state.lock().retry_count
    }

    /// Establish the connection, or return the existing handle.
    ///
    /// On failure a background reconnection is started and the original
    /// error is returned.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<dyn Store>, ConnectionError> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let epoch = self.epoch();
        match self.attempt(epoch).await {
            Err(ConnectionError::Connect(err)) => {
                tracing::error!(
                    address = %self.connector.address(),
                    error = %err,
                    "Database connection error"
                );
                self.spawn_reconnect();
                Err(ConnectionError::Connect(err))
            }
            other => other,
        }
    }

    /// Current handle, without waiting.
    ///
    /// If the handle reports a disconnected transport, a background
    /// reconnection is started and the stale handle is still returned.
    pub fn handle(self: &Arc<Self>) -> Result<Arc<dyn Store>, ConnectionError> {
        let handle = {
            let state = self.state.lock();
            if !state.initialized {
                return Err(ConnectionError::NotInitialized);
            }
            state.handle.clone().ok_or(ConnectionError::Unavailable)?
        };

        if !handle.is_connected() {
            tracing::warn!("Database client disconnected, attempting to reconnect");
            self.spawn_reconnect();
        }

        Ok(handle)
    }

    /// Reconnect with backoff until success or the retry budget is spent.
    ///
    /// Returns immediately if another reconnection loop is running.
    pub async fn reconnect(self: &Arc<Self>) {
        let Some(_running) = FlagGuard::acquire(&self.reconnecting) else {
            tracing::debug!("Reconnection already running");
            return;
        };

        let epoch = self.epoch();
        loop {
            let retry = {
                let mut state = self.state.lock();
                if state.status == ConnectionStatus::Closed || state.epoch != epoch {
                    return;
                }
                if self.options.backoff.exhausted(state.retry_count) {
                    state.status = ConnectionStatus::PermanentlyFailed;
                    tracing::error!(
                        max_retries = self.options.backoff.max_retries,
                        "Failed to reconnect after maximum attempts, giving up"
                    );
                    return;
                }
                state.status = ConnectionStatus::Reconnecting;
                state.retry_count
            };

            self.release_handle().await;

            let delay = self.options.backoff.delay_for(retry);
            let attempt = {
                let mut state = self.state.lock();
                state.retry_count += 1;
                state.retry_count
            };
            tracing::info!(
                attempt,
                max_retries = self.options.backoff.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Reconnect attempt scheduled"
            );
            tokio::time::sleep(delay).await;

            if self.status() == ConnectionStatus::Closed {
                return;
            }

            match self.attempt(epoch).await {
                Ok(_) => {
                    tracing::info!("Successfully reconnected to database");
                    return;
                }
                Err(ConnectionError::Closed) => {
                    tracing::debug!("Manager closed during reconnection, stopping");
                    return;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Reconnection attempt failed");
                    self.state.lock().status = ConnectionStatus::Reconnecting;
                }
            }
        }
    }

    /// Shut the transport down and clear all state.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let (handle, supervisor) = {
            let mut state = self.state.lock();
            state.status = ConnectionStatus::Closed;
            state.initialized = false;
            state.epoch += 1;
            state.retry_count = 0;
            (state.handle.take(), state.supervisor.take())
        };

        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        if let Some(handle) = handle {
            handle.close().await.map_err(|err| {
                tracing::error!(error = %err, "Error closing database connection");
                ConnectionError::Close(err)
            })?;
            tracing::info!("Database connection closed successfully");
        }

        Ok(())
    }

    /// Ping the store; `false` when there is no handle or the ping fails.
    pub async fn check_health(&self) -> bool {
        let handle = self.state.lock().handle.clone();
        let Some(handle) = handle else {
            return false;
        };

        match handle.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "Database connection check failed");
                false
            }
        }
    }

    fn current(&self) -> Option<Arc<dyn Store>> {
        self.state.lock().handle.clone()
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.status() == ConnectionStatus::Closed {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.reconnect().await });
    }

    /// Single-flight connection attempt on behalf of a caller that started
    /// in `epoch`.
    async fn attempt(self: &Arc<Self>, epoch: u64) -> Result<Arc<dyn Store>, ConnectionError> {
        if self.epoch() != epoch {
            return Err(ConnectionError::Closed);
        }

        let Some(_connecting) = FlagGuard::acquire(&self.connecting) else {
            tracing::debug!("Connection already in progress, waiting");
            while self.connecting.load(Ordering::Acquire) {
                tokio::time::sleep(self.options.poll_interval).await;
            }
            return self.current().ok_or(ConnectionError::Unavailable);
        };

        // An attempt may have finished between the caller's check and ours
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Err(ConnectionError::Closed);
            }
            state.status = ConnectionStatus::Connecting;
        }
        tracing::info!(address = %self.connector.address(), "Connecting to database");

        self.establish(epoch).await
    }

    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<Arc<dyn Store>, ConnectionError> {
        let (signals, receiver) = mpsc::unbounded_channel();
        let handle = match self.connector.connect(signals).await {
            Ok(handle) => handle,
            Err(err) => {
                let mut state = self.state.lock();
                if state.epoch == epoch {
                    state.status = ConnectionStatus::Disconnected;
                }
                return Err(ConnectionError::Connect(err));
            }
        };

        let closed_meanwhile = self.state.lock().epoch != epoch;
        if closed_meanwhile {
            tracing::info!("Manager closed while connecting, discarding new connection");
            if let Err(err) = handle.close().await {
                tracing::error!(error = %err, "Error closing discarded database client");
            }
            return Err(ConnectionError::Closed);
        }

        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Err(ConnectionError::Closed);
        }
        state.generation += 1;
        state.handle = Some(Arc::clone(&handle));
        state.retry_count = 0;
        state.initialized = true;
        state.status = ConnectionStatus::Connected;
        if let Some(previous) = state.supervisor.take() {
            previous.abort();
        }
        state.supervisor = Some(tokio::spawn(supervise(
            Arc::downgrade(self),
            state.generation,
            receiver,
        )));
        tracing::info!(generation = state.generation, "Connected to database successfully");

        Ok(handle)
    }

    /// Drop the current handle and close it, ignoring close errors.
    async fn release_handle(&self) {
        let (handle, supervisor) = {
            let mut state = self.state.lock();
            (state.handle.take(), state.supervisor.take())
        };

        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        if let Some(handle) = handle {
            if let Err(err) = handle.close().await {
                tracing::error!(error = %err, "Error closing database client");
            }
        }
    }
}

/// Watch one handle's failure signals and trigger reconnection.
async fn supervise(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut signals: mpsc::UnboundedReceiver<FailureSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        if manager.generation() != generation {
            tracing::debug!(generation, "Ignoring signal from a replaced connection");
            break;
        }

        match signal {
            FailureSignal::HeartbeatFailed => {
                tracing::warn!("Database heartbeat failed");
                let lost = manager.current().is_some_and(|handle| !handle.is_connected());
                if lost {
                    tracing::error!("Database connection lost, attempting to reconnect");
                    manager.spawn_reconnect();
                }
            }
            FailureSignal::ConnectionClosed => {
                tracing::warn!("Database connection closed unexpectedly");
                manager.spawn_reconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryConnector;

    fn manager(connector: &MemoryConnector) -> Arc<ConnectionManager> {
        ConnectionManager::new(connector.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn connect_installs_handle() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);

        manager.connect().await.unwrap();

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.retry_count(), 0);
        assert!(manager.handle().is_ok());
        assert!(manager.check_health().await);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reuses_existing_handle() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_before_connect_is_not_initialized() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);

        assert!(matches!(manager.handle(), Err(ConnectionError::NotInitialized)));
        assert!(!manager.check_health().await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_attempt() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(2));
        let manager = manager(&connector);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.connect().await.map(|_| ()) })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_see_failed_attempt_as_unavailable() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(1));
        connector.fail_next_connects(1);
        let manager = manager(&connector);

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = manager.connect().await;

        assert!(matches!(first.await.unwrap(), Err(ConnectionError::Connect(_))));
        assert!(matches!(second, Err(ConnectionError::Unavailable)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_returns_error_and_retries_in_background() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(1);
        let manager = manager(&connector);

        let Err(err) = manager.connect().await else {
            panic!("connect should fail");
        };
        assert!(matches!(err, ConnectionError::Connect(_)));
        assert!(matches!(manager.handle(), Err(ConnectionError::NotInitialized)));

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.retry_count(), 0);
        assert!(manager.handle().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_gives_up() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(u32::MAX);
        let manager = manager(&connector);

        assert!(manager.connect().await.is_err());
        tokio::time::sleep(Duration::from_secs(120)).await;

        let attempts = connector.attempt_times();
        assert_eq!(attempts.len(), 6, "initial attempt plus five retries");

        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        for (gap, expected) in gaps.iter().zip([1_000u64, 2_000, 4_000, 8_000, 16_000]) {
            let expected = Duration::from_millis(expected);
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(50),
                "gap {gap:?} expected {expected:?}"
            );
        }
        assert_eq!(manager.status(), ConnectionStatus::PermanentlyFailed);
        assert_eq!(manager.retry_count(), 5);

        // Budget spent: further triggers don't connect again
        manager.reconnect().await;
        assert_eq!(connector.connect_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failure_on_lost_connection_reconnects() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_connected(false);
        connector.emit(FailureSignal::HeartbeatFailed);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(manager.handle().unwrap().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failure_on_healthy_connection_is_ignored() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.emit(FailureSignal::HeartbeatFailed);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_signal_reconnects() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.emit(FailureSignal::ConnectionClosed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
        assert!(matches!(manager.handle(), Err(ConnectionError::Unavailable)));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(connector.connect_attempts(), 2);
        assert!(manager.handle().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn handle_returns_stale_handle_and_reconnects() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_connected(false);
        let stale = manager.handle().unwrap();
        assert!(!stale.is_connected());

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(connector.connect_attempts(), 2);
        assert!(manager.handle().unwrap().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_reconnection_loop_runs() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_connected(false);
        for _ in 0..10 {
            let _ = manager.handle();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_clears_state() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        manager.close().await.unwrap();

        assert_eq!(manager.status(), ConnectionStatus::Closed);
        assert!(matches!(manager.handle(), Err(ConnectionError::NotInitialized)));
        assert!(!manager.check_health().await);

        // A closed manager does not come back on its own
        connector.emit(FailureSignal::ConnectionClosed);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_reconnect_attempt_stays_closed() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        // Retry starts after 1s and its handshake runs until 3s
        connector.set_connect_delay(Duration::from_secs(2));
        connector.emit(FailureSignal::ConnectionClosed);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(connector.connect_attempts(), 2);

        manager.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(manager.status(), ConnectionStatus::Closed);
        assert!(matches!(manager.handle(), Err(ConnectionError::NotInitialized)));
        assert!(!manager.check_health().await);
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_close_reopens() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        manager.close().await.unwrap();

        manager.connect().await.unwrap();

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(manager.handle().is_ok());
        assert!(manager.check_health().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_propagates_errors() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_close_failure(true);
        assert!(matches!(manager.close().await, Err(ConnectionError::Close(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_swallows_close_errors() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_close_failure(true);
        manager.reconnect().await;

        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_ping_failures() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        connector.set_ping_failure(true);
        assert!(!manager.check_health().await);

        connector.set_ping_failure(false);
        assert!(manager.check_health().await);
    }
}
