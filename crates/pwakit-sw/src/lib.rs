//! # PwaKit Service Worker
//!
//! An offline-capable fetch interception engine: precaches the application
//! shell, keeps a runtime cache of everything else, and mirrors a remote
//! API into a local object store.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (evict stale caches, claim clients)
//! - **Cache API**: versioned cache generations with exact-key lookup
//! - **Fetch routing**: API refresh, cache-first shell, cache-then-network with
//!   an offline page
//! - **Mirroring**: best-effort copy of API responses into `pwakit-idb`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker
//!     ├── Lifecycle (Parsed → Installing → Installed → Activating → Activated)
//!     ├── WorkerScope (shared across worker versions)
//!     │       ├── CacheStorage
//!     │       │       ├── static-vN  (StaticCache)
//!     │       │       └── dynamic-vN (DynamicCache)
//!     │       ├── Clients
//!     │       ├── Fetcher (network)
//!     │       └── Connection (persistent store)
//!     └── FetchRouter
//!             ├── RemoteRefresh → network + Mirror (background)
//!             ├── StaticAsset   → StaticCache
//!             └── Fallback      → DynamicCache / network / offline page
//! ```

use pwakit_idb::IDBError;
use pwakit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod dynamic_cache;
pub mod events;
pub mod lifecycle;
pub mod mirror;
pub mod router;
pub mod static_cache;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, SharedCaches};
pub use clients::{Client, ClientType, Clients};
pub use config::{FallbackStrategy, WorkerConfig};
pub use dynamic_cache::DynamicCache;
pub use events::WorkerEvent;
pub use lifecycle::{Lifecycle, ServiceWorkerState};
pub use mirror::{open_mirror_store, Mirror, MirrorReport};
pub use router::{classify, FetchRouter, Route};
pub use static_cache::{StaticCache, StaticManifest};
pub use worker::{ServiceWorker, ServiceWorkerId, WorkerScope};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] IDBError),

    #[error("No cached response for {0}")]
    CacheMiss(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceWorkerError {
    /// Whether the caller observes a plain network failure.
    pub fn is_network(&self) -> bool {
        matches!(self, ServiceWorkerError::Network(_))
    }
}
