//! In-memory broker
//!
//! Implements the broker ports without any network I/O. Records everything
//! that gets published and lets callers inject failures: refused connects,
//! broker-initiated closes, failing or hanging publishes.

use crate::domain::errors::BrokerError;
use crate::domain::ports::{BrokerChannel, BrokerConnection, BrokerConnector};
use crate::domain::types::{MessageProperties, PublishRecord};
use crate::infrastructure::close_watch::wait_for_close;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A message accepted by the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct MockState {
    connect_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    fail_channel_open: AtomicBool,
    hang_publishes: AtomicBool,
    publish_attempts: AtomicUsize,
    // Countdown to the publish attempt that fails; 1 = the next one
    fail_publish_in: Mutex<Option<usize>>,
    channels_opened: AtomicUsize,
    channels_closed: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    declared_exchanges: Mutex<Vec<String>>,
    close_signal: Mutex<Option<watch::Sender<Option<String>>>>,
    // Status flag of the current connection, flipped by a graceful close
    open_flag: Mutex<Option<Arc<AtomicBool>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheaply cloneable handle to one in-memory broker
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Simulate the broker closing the current connection.
    pub fn close_connection(&self, reason: &str) {
        if let Some(signal) = lock(&self.state.close_signal).take() {
            signal.send_replace(Some(reason.to_string()));
        }
    }

    /// Simulate a clean broker-initiated close: the connection reports
    /// itself closed but no error is ever raised.
    pub fn close_gracefully(&self) {
        if let Some(open) = lock(&self.state.open_flag).take() {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Make the `nth` publish attempt from now fail (1 = the next one).
    pub fn fail_nth_publish(&self, nth: usize) {
        *lock(&self.state.fail_publish_in) = Some(nth.max(1));
    }

    /// Publishes never complete while set.
    pub fn hang_publishes(&self, hang: bool) {
        self.state.hang_publishes.store(hang, Ordering::SeqCst);
    }

    pub fn fail_channel_open(&self, fail: bool) {
        self.state.fail_channel_open.store(fail, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn publish_attempts(&self) -> usize {
        self.state.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.state.channels_closed.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    pub fn declared_exchanges(&self) -> Vec<String> {
        lock(&self.state.declared_exchanges).clone()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let refused = self
            .state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            debug!("MockBroker: refusing connection attempt {}", attempt);
            return Err(BrokerError::Connect {
                reason: "connection refused".to_string(),
            });
        }

        let (signal, errors) = watch::channel(None);
        let open = Arc::new(AtomicBool::new(true));
        *lock(&self.state.close_signal) = Some(signal);
        *lock(&self.state.open_flag) = Some(open.clone());
        Ok(Arc::new(MockConnection {
            state: self.state.clone(),
            errors,
            open,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    errors: watch::Receiver<Option<String>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        if self.errors.borrow().is_some() || !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::Channel {
                reason: "connection closed".to_string(),
            });
        }
        if self.state.fail_channel_open.load(Ordering::SeqCst) {
            return Err(BrokerError::Channel {
                reason: "channel limit reached".to_string(),
            });
        }
        self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            state: self.state.clone(),
        }))
    }

    async fn closed(&self) -> String {
        wait_for_close(self.errors.clone(), STATUS_POLL_INTERVAL, || {
            (!self.open.load(Ordering::SeqCst)).then(|| "closed by broker".to_string())
        })
        .await
    }
}

struct MockChannel {
    state: Arc<MockState>,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        lock(&self.state.declared_exchanges).push(exchange.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        record: &PublishRecord,
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        self.state.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if self.state.hang_publishes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let fail = {
            let mut countdown = lock(&self.state.fail_publish_in);
            match countdown.as_mut() {
                Some(1) => {
                    *countdown = None;
                    true
                }
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            }
        };
        if fail {
            return Err(BrokerError::Publish {
                routing_key: record.routing_key.clone(),
                reason: "channel closed by broker".to_string(),
            });
        }

        lock(&self.state.published).push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: record.routing_key.clone(),
            payload: record.payload.clone(),
            properties: *properties,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.channels_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
