use crate::domain::errors::BrokerError;
use crate::domain::snapshot::MetricsSnapshot;
use crate::domain::types::{MessageProperties, PublishRecord};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Establishes new broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// A live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    /// Resolves once the connection errors out or the broker closes it,
    /// yielding a human-readable reason.
    async fn closed(&self) -> String;
}

/// A channel opened for the duration of one flush.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable topic exchange. Repeated identical declarations are no-ops.
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        record: &PublishRecord,
        properties: &MessageProperties,
    ) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Callback receiving `(category, name, value)` status entries.
pub type StatusEmitter<'a> = &'a mut dyn FnMut(&str, &str, i64);

/// A backend the metrics-aggregation host drives on every flush interval.
pub trait MetricsBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Flush one snapshot. Implementations copy the snapshot before
    /// returning, so the host may mutate it while the future runs.
    fn flush(&self, timestamp: i64, snapshot: &MetricsSnapshot) -> BoxFuture<'static, ()>;

    fn status(&self, emit: StatusEmitter<'_>);
}

/// The host's event system, as seen by a backend during initialization.
pub trait EventRegistrar {
    fn register(&mut self, backend: Arc<dyn MetricsBackend>);
}
