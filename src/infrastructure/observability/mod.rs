//! Self-observability for the AMQP backend
//!
//! Only outbound data: prometheus collectors in a private registry that the
//! host can render, plus the health timestamps exposed via status callbacks.
//! No HTTP server, no incoming requests.

pub mod metrics;

pub use metrics::Metrics;
