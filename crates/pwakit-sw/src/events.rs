//! Events published by a running worker.

use crate::lifecycle::ServiceWorkerState;
use crate::worker::ServiceWorkerId;

/// Service worker events.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// App shell precached.
    Precached { cache: String, entries: usize },
    /// A stale cache generation was removed during activation.
    CacheDeleted { name: String },
    /// Open clients are now controlled by this worker.
    ClientsClaimed { worker_id: ServiceWorkerId, count: usize },
    /// Oldest runtime entries evicted to respect the cache limit.
    DynamicCacheTrimmed { cache: String, evicted: Vec<String> },
    /// API response copied into the store.
    MirrorCompleted {
        collection: String,
        written: usize,
        skipped: usize,
    },
    /// Mirroring gave up; the caller already has its response.
    MirrorFailed { collection: String, error: String },
    /// The offline page stood in for a failed document request.
    OfflineFallback { url: String },
}
