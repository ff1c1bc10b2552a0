//! Prometheus self-metrics for the AMQP backend
//!
//! All metrics use the `statsd_amqp_` prefix and live in a private registry,
//! so several backend instances never collide.

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics describing the backend's own behaviour
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Flushes by outcome (`success` / `failure`)
    pub flushes_total: CounterVec,
    /// Messages accepted by the broker
    pub records_published_total: Counter,
    /// Connection attempts made after the first one
    pub reconnects_total: Counter,
    /// 1 while a broker connection is available
    pub connection_up: Gauge,
    /// Wall time of a flush, failed ones included
    pub flush_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new Metrics instance with all collectors registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let flushes_total = CounterVec::new(
            Opts::new("statsd_amqp_flushes_total", "Total flushes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(flushes_total.clone()))?;

        let records_published_total = Counter::with_opts(Opts::new(
            "statsd_amqp_records_published_total",
            "Total messages published to the broker",
        ))?;
        registry.register(Box::new(records_published_total.clone()))?;

        let reconnects_total = Counter::with_opts(Opts::new(
            "statsd_amqp_reconnects_total",
            "Total broker reconnection attempts",
        ))?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let connection_up = Gauge::with_opts(Opts::new(
            "statsd_amqp_connection_up",
            "Broker connection status (0=down, 1=up)",
        ))?;
        registry.register(Box::new(connection_up.clone()))?;

        let flush_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "statsd_amqp_flush_duration_seconds",
                "Flush duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(flush_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            flushes_total,
            records_published_total,
            reconnects_total,
            connection_up,
            flush_duration_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_flush(&self, outcome: &str) {
        self.flushes_total.with_label_values(&[outcome]).inc();
    }

    pub fn flush_count(&self, outcome: &str) -> f64 {
        self.flushes_total.with_label_values(&[outcome]).get()
    }

    pub fn set_connected(&self, up: bool) {
        self.connection_up.set(if up { 1.0 } else { 0.0 });
    }
}
