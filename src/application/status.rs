use crate::domain::ports::StatusEmitter;
use crate::domain::telemetry::Telemetry;
use std::sync::Arc;

/// Category under which backend status entries are reported to the host
pub const STATUS_CATEGORY: &str = "broker";

/// Exposes the backend's telemetry to the host's health checks.
#[derive(Clone)]
pub struct StatusReporter {
    telemetry: Arc<Telemetry>,
}

impl StatusReporter {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self { telemetry }
    }

    /// Emit every telemetry entry as `(broker, name, value)`.
    pub fn report(&self, emit: StatusEmitter<'_>) {
        for (name, value) in self.telemetry.entries() {
            emit(STATUS_CATEGORY, name, value);
        }
    }
}
