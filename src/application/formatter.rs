//! Snapshot → message transformation
//!
//! Pure and deterministic: the same snapshot, configuration and timestamp
//! always yield byte-identical records in the same order.
//!
//! # Graphite
//!
//! One record per metric line, routed by the dotted metric name:
//!
//! ```text
//! stats.counters.hits.rate 1 1000
//! stats.counters.hits.count 10 1000
//! stats.statsd.numStats 2 1000
//! ```
//!
//! Counters first, then gauges, then every numeric timer leaf, then
//! `numStats` (the number of lines emitted before it) and finally the
//! statsd meta-statistics.
//!
//! # JSON
//!
//! A single record routed by [`JSON_ROUTING_KEY`] carrying the whole
//! snapshot.

use crate::config::FormatConfig;
use crate::domain::errors::BrokerError;
use crate::domain::snapshot::MetricsSnapshot;
use crate::domain::types::{JSON_ROUTING_KEY, MessageFormat, MessageProperties, PublishRecord};

pub struct MetricFormatter {
    config: FormatConfig,
}

impl MetricFormatter {
    pub fn new(config: FormatConfig) -> Self {
        Self { config }
    }

    pub fn properties(&self) -> MessageProperties {
        MessageProperties::for_format(self.config.format)
    }

    pub fn format(
        &self,
        snapshot: &MetricsSnapshot,
        timestamp: i64,
    ) -> Result<Vec<PublishRecord>, BrokerError> {
        match self.config.format {
            MessageFormat::Graphite => Ok(self.format_graphite(snapshot, timestamp)),
            MessageFormat::Json => Ok(vec![PublishRecord::new(
                JSON_ROUTING_KEY,
                snapshot.to_json_bytes()?,
            )]),
        }
    }

    fn format_graphite(&self, snapshot: &MetricsSnapshot, timestamp: i64) -> Vec<PublishRecord> {
        let cfg = &self.config;
        let mut lines = GraphiteLines::new(&cfg.global_suffix, timestamp);

        for (name, count) in &snapshot.counters {
            // A counter without a rate still gets its rate line, as 0
            let rate = snapshot.counter_rates.get(name).copied().unwrap_or(0.0);
            lines.push(&[&cfg.global_prefix, &cfg.prefix_counter, name, "rate"], rate);
            if cfg.flush_counts {
                lines.push(&[&cfg.global_prefix, &cfg.prefix_counter, name, "count"], *count);
            }
        }

        for (name, value) in &snapshot.gauges {
            lines.push(&[&cfg.global_prefix, &cfg.prefix_gauge, name], *value);
        }

        for (timer, stats) in &snapshot.timer_data {
            for (stat_name, stat) in stats {
                let mut path = vec![
                    cfg.global_prefix.as_str(),
                    cfg.prefix_timer.as_str(),
                    timer.as_str(),
                    stat_name.as_str(),
                ];
                stat.for_each_leaf(&mut path, &mut |segments: &[&str], value: f64| {
                    lines.push(segments, value);
                });
            }
        }

        let num_stats = lines.len() as f64;
        lines.push(&[&cfg.global_prefix, &cfg.prefix_stats, "numStats"], num_stats);

        for (name, value) in &snapshot.statsd_metrics {
            lines.push(&[&cfg.global_prefix, &cfg.prefix_stats, name], *value);
        }

        lines.into_records()
    }
}

/// Accumulates graphite lines for one flush.
struct GraphiteLines<'a> {
    suffix: &'a str,
    ts_suffix: String,
    records: Vec<PublishRecord>,
}

impl<'a> GraphiteLines<'a> {
    fn new(suffix: &'a str, timestamp: i64) -> Self {
        Self {
            suffix,
            ts_suffix: format!(" {}\n", timestamp),
            records: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn push(&mut self, segments: &[&str], value: f64) {
        let metric = join_segments(segments);
        let mut line = metric.clone();
        if !self.suffix.is_empty() {
            line.push('.');
            line.push_str(self.suffix);
        }
        line.push(' ');
        line.push_str(&format_value(value));
        line.push_str(&self.ts_suffix);
        self.records.push(PublishRecord::new(metric, line));
    }

    fn into_records(self) -> Vec<PublishRecord> {
        self.records
    }
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

/// Shortest decimal form that round-trips: `1.0` prints as `1`, `0.25` as `0.25`.
pub fn format_value(value: f64) -> String {
    value.to_string()
}
