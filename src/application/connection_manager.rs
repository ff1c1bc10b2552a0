//! Broker connection lifecycle
//!
//! A single supervisor task owns the connection and drives the state machine:
//!
//! ```text
//! Disconnected --start--> Connecting --ok--> Connected
//!                            ^  |                |
//!                            |  +--fail/timeout--+ (wait retry_delay)
//!                            +----error/close----+
//! ```
//!
//! The current state is published through a watch channel, so the
//! publisher can borrow the live handle at flush time without waiting on
//! the supervisor.

use crate::domain::ports::{BrokerConnection, BrokerConnector};
use crate::infrastructure::observability::Metrics;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Phase of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state as seen by readers. Only `Connected` carries a handle.
#[derive(Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(Arc<dyn BrokerConnection>),
}

impl ConnectionState {
    pub fn phase(&self) -> ConnectionPhase {
        match self {
            ConnectionState::Disconnected => ConnectionPhase::Disconnected,
            ConnectionState::Connecting => ConnectionPhase::Connecting,
            ConnectionState::Connected(_) => ConnectionPhase::Connected,
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.phase())
    }
}

/// Owns the broker connection and keeps it alive.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    retry_delay: Duration,
    connect_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    metrics: Metrics,
    // Handle for the supervisor task; at most one runs at a time
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        retry_delay: Duration,
        connect_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            retry_delay,
            connect_timeout,
            state: Arc::new(state),
            metrics,
            task_handle: Mutex::new(None),
        }
    }

    /// Spawn the supervisor task. Calling this while it runs is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handle_guard = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle_guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let supervisor = Supervisor {
            connector: self.connector.clone(),
            retry_delay: self.retry_delay,
            connect_timeout: self.connect_timeout,
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        };
        *handle_guard = Some(tokio::spawn(supervisor.run()));
    }

    /// Stop reconnecting and drop the current connection.
    pub fn shutdown(&self) {
        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.state.send_replace(ConnectionState::Disconnected);
        self.metrics.set_connected(false);
    }

    /// The live connection, or `None` while disconnected or reconnecting.
    pub fn current_handle(&self) -> Option<Arc<dyn BrokerConnection>> {
        match &*self.state.borrow() {
            ConnectionState::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.borrow().phase()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// State owned by the background reconnect loop.
struct Supervisor {
    connector: Arc<dyn BrokerConnector>,
    retry_delay: Duration,
    connect_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    metrics: Metrics,
}

impl Supervisor {
    async fn run(self) {
        // `attempt` numbers the attempts since the last connection for logging;
        // every attempt after the very first one counts as a reconnect
        let mut attempt: u64 = 0;
        let mut first_attempt = true;

        loop {
            attempt += 1;
            if !first_attempt {
                self.metrics.reconnects_total.inc();
            }
            first_attempt = false;
            self.transition(ConnectionState::Connecting);
            info!("ConnectionManager: Connecting to broker (attempt {})", attempt);

            match tokio::time::timeout(self.connect_timeout, self.connector.connect()).await {
                Ok(Ok(connection)) => {
                    self.transition(ConnectionState::Connected(connection.clone()));
                    self.metrics.set_connected(true);
                    info!("ConnectionManager: Connected to broker");
                    attempt = 0;

                    let reason = connection.closed().await;

                    // Invalidate the handle before anything else
                    self.transition(ConnectionState::Connecting);
                    self.metrics.set_connected(false);
                    warn!(
                        "ConnectionManager: Disconnected from broker ({}). Reconnecting in {:?}...",
                        reason, self.retry_delay
                    );
                }
                Ok(Err(e)) => {
                    error!(
                        "ConnectionManager: {}. Retrying in {:?}...",
                        e, self.retry_delay
                    );
                }
                Err(_) => {
                    error!(
                        "ConnectionManager: Connect timed out after {:?}. Retrying in {:?}...",
                        self.connect_timeout, self.retry_delay
                    );
                }
            }

            tokio::time::sleep(self.retry_delay).await;
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        let current = self.state.borrow().phase();
        if previous.phase() != current {
            info!(
                "ConnectionManager: {:?} -> {:?}",
                previous.phase(),
                current
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBroker;
    use tokio::time::timeout;

    fn manager(broker: &MockBroker, retry_ms: u64) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(broker.clone()),
            Duration::from_millis(retry_ms),
            Duration::from_millis(200),
            Metrics::new().expect("metrics"),
        )
    }

    async fn wait_for_phase(manager: &ConnectionManager, phase: ConnectionPhase) {
        let mut rx = manager.subscribe();
        timeout(Duration::from_secs(2), rx.wait_for(|s| s.phase() == phase))
            .await
            .expect("phase not reached in time")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_initially_disconnected() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 10);

        assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
        assert!(manager.current_handle().is_none());
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_connects_and_exposes_handle() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 10);
        manager.start();

        wait_for_phase(&manager, ConnectionPhase::Connected).await;
        assert!(manager.current_handle().is_some());
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 10);
        manager.start();
        manager.start();

        wait_for_phase(&manager, ConnectionPhase::Connected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_failed_connects() {
        let broker = MockBroker::new();
        broker.fail_next_connects(3);
        let manager = manager(&broker, 10);
        manager.start();

        wait_for_phase(&manager, ConnectionPhase::Connected).await;
        assert_eq!(broker.connect_attempts(), 4);
    }

    #[tokio::test]
    async fn test_close_invalidates_handle_and_reconnects() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 100);
        manager.start();
        wait_for_phase(&manager, ConnectionPhase::Connected).await;

        let mut rx = manager.subscribe();
        broker.close_connection("connection forced");
        timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.phase() == ConnectionPhase::Connecting),
        )
        .await
        .expect("handle not invalidated")
        .expect("state channel closed");
        assert!(manager.current_handle().is_none());

        wait_for_phase(&manager, ConnectionPhase::Connected).await;
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(manager.metrics.reconnects_total.get(), 1.0);
    }

    #[tokio::test]
    async fn test_graceful_close_reconnects() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 20);
        manager.start();
        wait_for_phase(&manager, ConnectionPhase::Connected).await;

        let mut rx = manager.subscribe();
        broker.close_gracefully();
        timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.phase() != ConnectionPhase::Connected),
        )
        .await
        .expect("graceful close not observed")
        .expect("state channel closed");

        wait_for_phase(&manager, ConnectionPhase::Connected).await;
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(manager.metrics.reconnects_total.get(), 1.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_supervisor() {
        let broker = MockBroker::new();
        let manager = manager(&broker, 10);
        manager.start();
        wait_for_phase(&manager, ConnectionPhase::Connected).await;

        manager.shutdown();
        assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
        assert!(manager.current_handle().is_none());

        broker.close_connection("bye");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.connect_attempts(), 1);
    }
}
