//! AMQP metrics backend: the entry point the aggregation host initializes.
//!
//! Wires the connection manager, publisher and status reporter together
//! into one explicit context object and registers it with the host's event
//! system. Several independent backends can coexist in one process.

use crate::application::connection_manager::{ConnectionManager, ConnectionPhase};
use crate::application::formatter::MetricFormatter;
use crate::application::publisher::{FlushOutcome, Publisher};
use crate::application::status::StatusReporter;
use crate::config::BackendConfig;
use crate::domain::ports::{BrokerConnector, EventRegistrar, MetricsBackend, StatusEmitter};
use crate::domain::snapshot::MetricsSnapshot;
use crate::domain::telemetry::Telemetry;
use crate::infrastructure::amqp::LapinConnector;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::info;

pub const BACKEND_NAME: &str = "statsd-amqp";

pub struct AmqpBackend {
    connections: Arc<ConnectionManager>,
    publisher: Arc<Publisher>,
    status: StatusReporter,
    metrics: Metrics,
}

impl AmqpBackend {
    /// Validate `config`, connect to the configured broker in the background
    /// and register flush/status handling with the host.
    ///
    /// Fails fast on invalid configuration (including unreadable TLS files);
    /// broker unavailability is not an error.
    pub fn init(
        startup_time: i64,
        config: &BackendConfig,
        events: &mut dyn EventRegistrar,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let connector =
            LapinConnector::from_config(&config.broker).context("Failed to prepare AMQP connector")?;
        info!(
            "AmqpBackend: Broker {} (exchange '{}', format {})",
            config.broker.redacted_uri(),
            config.broker.exchange,
            config.format.format
        );
        Self::init_with_connector(startup_time, config, Arc::new(connector), events)
    }

    /// Same as [`init`](Self::init) with a caller-provided connector.
    pub fn init_with_connector(
        startup_time: i64,
        config: &BackendConfig,
        connector: Arc<dyn BrokerConnector>,
        events: &mut dyn EventRegistrar,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let metrics = Metrics::new().context("Failed to register backend metrics")?;
        let telemetry = Arc::new(Telemetry::new(startup_time));

        let connections = Arc::new(ConnectionManager::new(
            connector,
            config.retry_delay,
            config.operation_timeout,
            metrics.clone(),
        ));
        let publisher = Arc::new(Publisher::new(
            connections.clone(),
            MetricFormatter::new(config.format.clone()),
            config.broker.exchange.clone(),
            telemetry.clone(),
            metrics.clone(),
            config.operation_timeout,
        ));

        let backend = Arc::new(Self {
            connections: connections.clone(),
            publisher,
            status: StatusReporter::new(telemetry),
            metrics,
        });

        connections.start();
        events.register(backend.clone());
        Ok(backend)
    }

    /// Flush and report what happened.
    pub fn flush_with_outcome(
        &self,
        timestamp: i64,
        snapshot: &MetricsSnapshot,
    ) -> BoxFuture<'static, FlushOutcome> {
        self.publisher.flush(timestamp, snapshot)
    }

    pub fn connection_phase(&self) -> ConnectionPhase {
        self.connections.phase()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        self.publisher.telemetry()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn shutdown(&self) {
        info!("AmqpBackend: Shutting down");
        self.connections.shutdown();
    }
}

impl MetricsBackend for AmqpBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn flush(&self, timestamp: i64, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ()> {
        self.publisher
            .flush(timestamp, snapshot)
            .map(|_outcome| ())
            .boxed()
    }

    fn status(&self, emit: StatusEmitter<'_>) {
        self.status.report(emit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_hub::EventHub;
    use crate::infrastructure::mock::MockBroker;
    use std::time::Duration;

    #[tokio::test]
    async fn test_init_registers_backend() {
        let mut hub = EventHub::new();
        let broker = MockBroker::new();

        let backend = AmqpBackend::init_with_connector(
            1_000,
            &BackendConfig::default(),
            Arc::new(broker.clone()),
            &mut hub,
        )
        .expect("init");

        assert_eq!(hub.backend_count(), 1);
        assert_eq!(backend.telemetry().last_flush(), 1_000);
        assert_eq!(backend.telemetry().last_exception(), 1_000);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let mut hub = EventHub::new();
        let config = BackendConfig {
            retry_delay: Duration::ZERO,
            ..BackendConfig::default()
        };

        let result =
            AmqpBackend::init_with_connector(0, &config, Arc::new(MockBroker::new()), &mut hub);

        assert!(result.is_err());
        assert_eq!(hub.backend_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_without_connection_records_failure() {
        let mut hub = EventHub::new();
        let broker = MockBroker::new();
        broker.fail_next_connects(usize::MAX);
        let config = BackendConfig {
            retry_delay: Duration::from_secs(60),
            ..BackendConfig::default()
        };

        let backend =
            AmqpBackend::init_with_connector(0, &config, Arc::new(broker.clone()), &mut hub)
                .expect("init");
        let outcome = backend
            .flush_with_outcome(10, &MetricsSnapshot::default())
            .await;

        assert!(matches!(
            outcome,
            FlushOutcome::Failed {
                sent: 0,
                error: crate::domain::errors::BrokerError::NotConnected
            }
        ));
        assert_eq!(backend.telemetry().last_flush(), 0);
        assert!(backend.telemetry().last_exception() > 0);
        assert_ne!(backend.connection_phase(), ConnectionPhase::Connected);
    }
}
