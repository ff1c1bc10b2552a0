//! AMQP backend for a statsd-style metrics aggregator.
//!
//! On every flush the host hands over a [`MetricsSnapshot`]; the backend
//! formats it as graphite lines or a single JSON document and publishes the
//! result to a durable topic exchange, while a background task keeps the
//! broker connection alive.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::backend::AmqpBackend;
pub use config::BackendConfig;
pub use domain::snapshot::MetricsSnapshot;
