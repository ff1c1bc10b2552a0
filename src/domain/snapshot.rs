//! Metrics snapshot handed over by the aggregation host on every flush.
//!
//! The host owns its live copy and keeps mutating it between flushes, so the
//! backend always works on an owned clone (`MetricsSnapshot: Clone` is a deep
//! copy: every map, including nested timer breakdowns, is duplicated).
//!
//! Serialized numbers use their natural form: integral values are written as
//! integers (`10`, not `10.0`). JSON has no NaN or infinity, so non-finite
//! values are written as `null` and such a document does not parse back.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

// Largest magnitude below which every integral f64 is an exact i64
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Writes an `f64` the way the aggregator reports it.
struct JsonNumber(f64);

impl Serialize for JsonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
            serializer.serialize_i64(value as i64)
        } else {
            serializer.serialize_f64(value)
        }
    }
}

fn serialize_numbers<S: Serializer>(
    values: &BTreeMap<String, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(values.iter().map(|(name, value)| (name, JsonNumber(*value))))
}

/// A single timer statistic: either a plain number (`mean`, `upper_90`, ...)
/// or a named breakdown such as a histogram (`histogram.bin_100`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimerStat {
    Value(f64),
    Breakdown(BTreeMap<String, TimerStat>),
}

impl Serialize for TimerStat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TimerStat::Value(value) => JsonNumber(*value).serialize(serializer),
            TimerStat::Breakdown(children) => children.serialize(serializer),
        }
    }
}

impl TimerStat {
    /// Number of numeric leaves below (and including) this statistic.
    pub fn leaf_count(&self) -> usize {
        match self {
            TimerStat::Value(_) => 1,
            TimerStat::Breakdown(children) => children.values().map(TimerStat::leaf_count).sum(),
        }
    }

    /// Visit every numeric leaf with its path relative to this statistic.
    ///
    /// `path` holds the segments leading to `self`; leaves are visited in
    /// key order.
    pub fn for_each_leaf<'a, F>(&'a self, path: &mut Vec<&'a str>, visit: &mut F)
    where
        F: FnMut(&[&'a str], f64),
    {
        match self {
            TimerStat::Value(value) => visit(path, *value),
            TimerStat::Breakdown(children) => {
                for (key, child) in children {
                    path.push(key);
                    child.for_each_leaf(path, visit);
                    path.pop();
                }
            }
        }
    }
}

/// Point-in-time aggregate of counters, gauges, timers and statsd's own
/// meta-statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    /// Cumulative count per counter since the last flush
    #[serde(serialize_with = "serialize_numbers")]
    pub counters: BTreeMap<String, f64>,
    /// Per-interval rate per counter
    #[serde(serialize_with = "serialize_numbers")]
    pub counter_rates: BTreeMap<String, f64>,
    #[serde(serialize_with = "serialize_numbers")]
    pub gauges: BTreeMap<String, f64>,
    /// Timer name -> statistic name -> statistic
    pub timer_data: BTreeMap<String, BTreeMap<String, TimerStat>>,
    /// Meta-statistics such as `processing_time` or `bad_lines_seen`
    #[serde(serialize_with = "serialize_numbers")]
    pub statsd_metrics: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    /// Total number of numeric timer leaves across all timers.
    pub fn timer_leaf_count(&self) -> usize {
        self.timer_data
            .values()
            .flat_map(BTreeMap::values)
            .map(TimerStat::leaf_count)
            .sum()
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }
}
