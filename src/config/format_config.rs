//! Metric naming and wire-format configuration.

use crate::domain::types::MessageFormat;

/// How snapshots are turned into messages.
///
/// Prefixes are dot-joined name segments; an empty segment is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatConfig {
    pub format: MessageFormat,
    pub global_prefix: String,
    pub prefix_counter: String,
    pub prefix_gauge: String,
    pub prefix_timer: String,
    /// Appended to every graphite line name, never to routing keys
    pub global_suffix: String,
    /// Namespace of `numStats` and the meta-statistics
    pub prefix_stats: String,
    /// Emit `<counter>.count` lines next to `<counter>.rate`
    pub flush_counts: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            format: MessageFormat::Json,
            global_prefix: "stats".to_string(),
            prefix_counter: "counters".to_string(),
            prefix_gauge: "gauges".to_string(),
            prefix_timer: "timers".to_string(),
            global_suffix: String::new(),
            prefix_stats: "statsd".to_string(),
            flush_counts: true,
        }
    }
}

impl FormatConfig {
    pub fn graphite() -> Self {
        Self {
            format: MessageFormat::Graphite,
            ..Self::default()
        }
    }
}

/// Strip surrounding dots so `"stats."` and `"stats"` mean the same segment.
pub(crate) fn normalize_segment(raw: &str) -> String {
    raw.trim().trim_matches('.').to_string()
}
