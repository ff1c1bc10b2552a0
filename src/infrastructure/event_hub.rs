use crate::domain::ports::{EventRegistrar, MetricsBackend};
use crate::domain::snapshot::MetricsSnapshot;
use futures::future::join_all;
use std::sync::Arc;

/// Host-side event hub: backends register at init time, the host then
/// fans every flush and status request out to all of them.
#[derive(Clone, Default)]
pub struct EventHub {
    backends: Vec<Arc<dyn MetricsBackend>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flush every registered backend with the same snapshot and wait for
    /// all of them. Each backend copies the snapshot before this awaits.
    pub async fn flush_all(&self, timestamp: i64, snapshot: &MetricsSnapshot) {
        let flushes: Vec<_> = self
            .backends
            .iter()
            .map(|backend| backend.flush(timestamp, snapshot))
            .collect();
        join_all(flushes).await;
    }

    /// Collect status entries from every backend.
    pub fn status_all(&self, emit: &mut dyn FnMut(&str, &str, i64)) {
        for backend in &self.backends {
            backend.status(&mut *emit);
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Get count of registered backends (for testing)
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}

impl EventRegistrar for EventHub {
    fn register(&mut self, backend: Arc<dyn MetricsBackend>) {
        self.backends.push(backend);
    }
}
