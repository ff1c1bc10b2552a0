use thiserror::Error;

/// Errors raised while talking to the message broker.
///
/// None of these are fatal: the connection manager retries connectivity
/// failures and the publisher turns the rest into failure telemetry.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("No broker connection available")]
    NotConnected,

    #[error("Failed to connect to broker: {reason}")]
    Connect { reason: String },

    #[error("Failed to open channel: {reason}")]
    Channel { reason: String },

    #[error("Failed to declare exchange '{exchange}': {reason}")]
    ExchangeDeclare { exchange: String, reason: String },

    #[error("Failed to publish '{routing_key}': {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("Broker operation '{operation}' timed out after {duration_ms}ms")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}
