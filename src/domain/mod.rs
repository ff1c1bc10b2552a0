// Snapshot handed over by the aggregation host
pub mod snapshot;

// Wire-level types (records, properties, formats)
pub mod types;

// Port interfaces
pub mod ports;

// Backend health timestamps
pub mod telemetry;

// Domain-specific error types
pub mod errors;

pub use errors::BrokerError;
pub use snapshot::{MetricsSnapshot, TimerStat};
pub use telemetry::Telemetry;
pub use types::{MessageFormat, MessageProperties, PublishRecord};
