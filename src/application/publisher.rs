//! Flush pipeline: copy → borrow connection → channel → declare → format → publish.
//!
//! A flush succeeds or fails as a unit. The first failing step aborts the
//! rest of the flush; records already sent stay sent and the remaining ones
//! are dropped. The next scheduled flush starts from scratch.

use crate::application::connection_manager::ConnectionManager;
use crate::application::formatter::MetricFormatter;
use crate::domain::errors::BrokerError;
use crate::domain::ports::BrokerChannel;
use crate::domain::snapshot::MetricsSnapshot;
use crate::domain::telemetry::{Telemetry, unix_now};
use crate::infrastructure::observability::Metrics;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened during one flush
#[derive(Debug)]
pub enum FlushOutcome {
    Published { records: usize },
    Failed { sent: usize, error: BrokerError },
}

impl FlushOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlushOutcome::Published { .. })
    }
}

pub struct Publisher {
    connections: Arc<ConnectionManager>,
    formatter: MetricFormatter,
    exchange: String,
    telemetry: Arc<Telemetry>,
    metrics: Metrics,
    operation_timeout: Duration,
}

impl Publisher {
    pub fn new(
        connections: Arc<ConnectionManager>,
        formatter: MetricFormatter,
        exchange: impl Into<String>,
        telemetry: Arc<Telemetry>,
        metrics: Metrics,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            formatter,
            exchange: exchange.into(),
            telemetry,
            metrics,
            operation_timeout,
        }
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Flush `snapshot`. The snapshot is copied before this returns, so the
    /// caller's value is free to change while the flush is in flight.
    pub fn flush(
        self: &Arc<Self>,
        timestamp: i64,
        snapshot: &MetricsSnapshot,
    ) -> BoxFuture<'static, FlushOutcome> {
        let snapshot = snapshot.clone();
        let publisher = Arc::clone(self);
        async move { publisher.flush_owned(timestamp, snapshot).await }.boxed()
    }

    /// Flush a snapshot the caller already owns.
    pub async fn flush_owned(&self, timestamp: i64, snapshot: MetricsSnapshot) -> FlushOutcome {
        let started = Instant::now();
        let mut sent = 0;

        let outcome = match self.try_flush(timestamp, &snapshot, &mut sent).await {
            Ok(()) => {
                self.telemetry.record_flush(unix_now());
                self.metrics.inc_flush("success");
                debug!("Publisher: numStats: {}", sent);
                FlushOutcome::Published { records: sent }
            }
            Err(error) => {
                self.telemetry.record_exception(unix_now());
                self.metrics.inc_flush("failure");
                warn!(
                    "Publisher: Flush at {} failed after {} record(s): {}",
                    timestamp, sent, error
                );
                FlushOutcome::Failed { sent, error }
            }
        };

        self.metrics
            .flush_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    async fn try_flush(
        &self,
        timestamp: i64,
        snapshot: &MetricsSnapshot,
        sent: &mut usize,
    ) -> Result<(), BrokerError> {
        let connection = self
            .connections
            .current_handle()
            .ok_or(BrokerError::NotConnected)?;

        let channel = self
            .bounded("open_channel", connection.open_channel())
            .await?;

        match self.publish_all(channel.as_ref(), timestamp, snapshot, sent).await {
            Ok(()) => {
                if let Err(e) = self.bounded("close_channel", channel.close()).await {
                    warn!("Publisher: Failed to close channel after flush: {}", e);
                }
                Ok(())
            }
            Err(error) => {
                // Don't leak the channel on the failure path
                if let Err(e) = self.bounded("close_channel", channel.close()).await {
                    debug!("Publisher: Discarding broken channel: {}", e);
                }
                Err(error)
            }
        }
    }

    async fn publish_all(
        &self,
        channel: &dyn BrokerChannel,
        timestamp: i64,
        snapshot: &MetricsSnapshot,
        sent: &mut usize,
    ) -> Result<(), BrokerError> {
        // The default exchange always exists and cannot be declared
        if !self.exchange.is_empty() {
            self.bounded("declare_exchange", channel.declare_topic_exchange(&self.exchange))
                .await?;
        }

        let records = self.formatter.format(snapshot, timestamp)?;
        let properties = self.formatter.properties();

        for record in &records {
            self.bounded(
                "publish",
                channel.publish(&self.exchange, record, &properties),
            )
            .await?;
            *sent += 1;
            self.metrics.records_published_total.inc();
            debug!("Publisher: Published: {}", record.payload_lossy().trim_end());
        }

        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>>,
    {
        match tokio::time::timeout(self.operation_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                operation,
                duration_ms: self.operation_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection_manager::ConnectionPhase;
    use crate::config::FormatConfig;
    use crate::infrastructure::mock::MockBroker;

    async fn connected_publisher(
        broker: &MockBroker,
        format: FormatConfig,
        exchange: &str,
    ) -> Arc<Publisher> {
        let metrics = Metrics::new().expect("metrics");
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            Duration::from_millis(10),
            Duration::from_millis(200),
            metrics.clone(),
        ));
        connections.start();
        let mut rx = connections.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.phase() == ConnectionPhase::Connected),
        )
        .await
        .expect("connect timed out")
        .expect("state channel closed");

        Arc::new(Publisher::new(
            connections,
            MetricFormatter::new(format),
            exchange,
            Arc::new(Telemetry::new(0)),
            metrics,
            Duration::from_millis(100),
        ))
    }

    fn hits_snapshot() -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.counters.insert("hits".to_string(), 10.0);
        snapshot.counter_rates.insert("hits".to_string(), 1.0);
        snapshot
    }

    #[tokio::test]
    async fn test_successful_graphite_flush() {
        let broker = MockBroker::new();
        let publisher = connected_publisher(&broker, FormatConfig::graphite(), "metrics").await;

        let outcome = publisher.flush(1000, &hits_snapshot()).await;

        assert!(matches!(outcome, FlushOutcome::Published { records: 3 }));
        let published = broker.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].payload_str(), "stats.counters.hits.rate 1 1000\n");
        assert_eq!(published[0].exchange, "metrics");
        assert_eq!(published[0].properties.content_type, "text/graphite");
        assert_eq!(broker.declared_exchanges(), vec!["metrics".to_string()]);
        assert_eq!(broker.channels_opened(), 1);
        assert_eq!(broker.channels_closed(), 1);
        assert!(publisher.telemetry().last_flush() > 0);
        assert_eq!(publisher.telemetry().last_exception(), 0);
    }

    #[tokio::test]
    async fn test_default_exchange_is_not_declared() {
        let broker = MockBroker::new();
        let publisher = connected_publisher(&broker, FormatConfig::default(), "").await;

        let outcome = publisher.flush(1000, &hits_snapshot()).await;

        assert!(outcome.is_success());
        assert!(broker.declared_exchanges().is_empty());
        assert_eq!(broker.published()[0].routing_key, "json_payload");
    }

    #[tokio::test]
    async fn test_first_failure_aborts_flush() {
        let broker = MockBroker::new();
        let publisher = connected_publisher(&broker, FormatConfig::graphite(), "metrics").await;
        broker.fail_nth_publish(2);

        let outcome = publisher.flush(1000, &hits_snapshot()).await;

        match outcome {
            FlushOutcome::Failed { sent, error } => {
                assert_eq!(sent, 1);
                assert!(matches!(error, BrokerError::Publish { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(broker.publish_attempts(), 2);
        assert_eq!(broker.published().len(), 1);
        assert_eq!(publisher.telemetry().last_flush(), 0);
        assert!(publisher.telemetry().last_exception() > 0);
        // failure path still releases the channel
        assert_eq!(broker.channels_closed(), 1);
    }

    #[tokio::test]
    async fn test_hanging_publish_times_out() {
        let broker = MockBroker::new();
        let publisher = connected_publisher(&broker, FormatConfig::graphite(), "metrics").await;
        broker.hang_publishes(true);

        let outcome = publisher.flush(1000, &hits_snapshot()).await;

        assert!(matches!(
            outcome,
            FlushOutcome::Failed {
                sent: 0,
                error: BrokerError::Timeout {
                    operation: "publish",
                    ..
                }
            }
        ));
        assert!(publisher.telemetry().last_exception() > 0);
    }

    #[tokio::test]
    async fn test_channel_open_failure_is_recorded() {
        let broker = MockBroker::new();
        let publisher = connected_publisher(&broker, FormatConfig::graphite(), "metrics").await;
        broker.fail_channel_open(true);

        let outcome = publisher.flush(1000, &hits_snapshot()).await;

        assert!(matches!(
            outcome,
            FlushOutcome::Failed {
                error: BrokerError::Channel { .. },
                ..
            }
        ));
        assert_eq!(broker.publish_attempts(), 0);
        assert_eq!(publisher.metrics.flush_count("failure"), 1.0);
    }
}
