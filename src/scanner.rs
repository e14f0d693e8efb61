use serde::Serialize;
use tracing::info;

use crate::errors::AppResult;
use crate::queue::GeocodeQueue;
use crate::studios::StudioStore;

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub found: usize,
    pub enqueued: usize,
}

/// On-demand sweep for studios that still need coordinates.
#[derive(Clone)]
pub struct BulkScanner {
    store: StudioStore,
    queue: GeocodeQueue,
    placeholder: (f64, f64),
}

impl BulkScanner {
    pub fn new(store: StudioStore, queue: GeocodeQueue, placeholder: (f64, f64)) -> Self {
        Self {
            store,
            queue,
            placeholder,
        }
    }

    pub fn find_pending(&self) -> AppResult<Vec<i64>> {
        self.store.find_unresolved(self.placeholder)
    }

    pub fn scan_and_enqueue(&self) -> AppResult<ScanReport> {
        let pending = self.find_pending()?;
        let found = pending.len();
        let enqueued = self.queue.enqueue_many(pending);
        info!(target: "bulk_scanner", found, enqueued, "bulk scan queued studios");
        Ok(ScanReport { found, enqueued })
    }
}
