//! Self-reported health timestamps of the backend.

use std::sync::atomic::{AtomicI64, Ordering};

pub const LAST_FLUSH: &str = "last_flush";
pub const LAST_EXCEPTION: &str = "last_exception";

/// Unix-second timestamps of the last successful and last failed flush.
///
/// Both start at the host's startup time and only ever move forward.
#[derive(Debug)]
pub struct Telemetry {
    last_flush: AtomicI64,
    last_exception: AtomicI64,
}

impl Telemetry {
    pub fn new(startup_time: i64) -> Self {
        Self {
            last_flush: AtomicI64::new(startup_time),
            last_exception: AtomicI64::new(startup_time),
        }
    }

    pub fn record_flush(&self, at: i64) {
        self.last_flush.fetch_max(at, Ordering::SeqCst);
    }

    pub fn record_exception(&self, at: i64) {
        self.last_exception.fetch_max(at, Ordering::SeqCst);
    }

    pub fn last_flush(&self) -> i64 {
        self.last_flush.load(Ordering::SeqCst)
    }

    pub fn last_exception(&self) -> i64 {
        self.last_exception.load(Ordering::SeqCst)
    }

    /// All telemetry entries as `(name, value)` pairs.
    pub fn entries(&self) -> [(&'static str, i64); 2] {
        [
            (LAST_FLUSH, self.last_flush()),
            (LAST_EXCEPTION, self.last_exception()),
        ]
    }
}

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
