//! The worker: lifecycle events and fetch dispatch.

use pwakit_idb::Connection;
use pwakit_net::{Fetcher, Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::cache::{CacheStorage, SharedCaches};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::dynamic_cache::DynamicCache;
use crate::events::WorkerEvent;
use crate::lifecycle::{evict_stale_caches, Lifecycle, ServiceWorkerState};
use crate::mirror::Mirror;
use crate::router::FetchRouter;
use crate::static_cache::{StaticCache, StaticManifest};
use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Resources that outlive a single worker version: the network, the
/// persistent store, cache storage and the open clients.
#[derive(Clone)]
pub struct WorkerScope {
    pub fetcher: Arc<dyn Fetcher>,
    pub mirror: Arc<Mirror>,
    pub caches: SharedCaches,
    pub clients: Arc<RwLock<Clients>>,
}

impl WorkerScope {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Connection) -> Self {
        Self {
            fetcher,
            mirror: Arc::new(Mirror::new(store)),
            caches: CacheStorage::shared(),
            clients: Arc::new(RwLock::new(Clients::new())),
        }
    }

    /// Persistent store the mirror writes into.
    pub fn store(&self) -> &Connection {
        self.mirror.store()
    }
}

/// One version of the offline worker.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: WorkerConfig,
    scope: WorkerScope,
    lifecycle: RwLock<Lifecycle>,
    static_cache: StaticCache,
    dynamic_cache: DynamicCache,
    router: FetchRouter,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorker {
    /// Create a worker in the `Parsed` state.
    pub fn new(
        config: WorkerConfig,
        scope: WorkerScope,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manifest = StaticManifest::new(&config.origin, &config.static_manifest)?;
        let static_cache =
            StaticCache::new(scope.caches.clone(), &config.static_cache_name, manifest);
        let dynamic_cache = DynamicCache::new(
            scope.caches.clone(),
            &config.dynamic_cache_name,
            config.dynamic_cache_limit,
        );
        let router = FetchRouter::new(
            &config,
            static_cache.clone(),
            dynamic_cache.clone(),
            scope.caches.clone(),
            Arc::clone(&scope.mirror),
            Arc::clone(&scope.fetcher),
            event_tx.clone(),
        );

        let id = ServiceWorkerId::next();
        debug!(worker = id.raw(), static_cache = %config.static_cache_name, "Worker parsed");

        Ok((
            Self {
                id,
                config,
                scope,
                lifecycle: RwLock::new(Lifecycle::new()),
                static_cache,
                dynamic_cache,
                router,
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    pub fn static_cache(&self) -> &StaticCache {
        &self.static_cache
    }

    pub fn dynamic_cache(&self) -> &DynamicCache {
        &self.dynamic_cache
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.read().await.state()
    }

    async fn set_state(&self, state: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        self.lifecycle.write().await.transition(state)?;
        info!(worker = self.id.raw(), state = ?state, "Service worker state changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state: state,
        });
        Ok(())
    }

    /// Install event: precache the app shell.
    ///
    /// Resolves once every manifest resource is stored. On failure the
    /// worker becomes redundant and the static generation is left unwritten.
    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Installing).await?;

        match self.static_cache.install(self.scope.fetcher.as_ref()).await {
            Ok(entries) => {
                let _ = self.event_tx.send(WorkerEvent::Precached {
                    cache: self.static_cache.name().to_string(),
                    entries,
                });
                self.set_state(ServiceWorkerState::Installed).await?;
                Ok(entries)
            }
            Err(e) => {
                error!(worker = self.id.raw(), error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await?;
                Err(e)
            }
        }
    }

    /// Activate event: drop every other cache generation, then take control
    /// of open clients. Returns the deleted generation names.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Activating).await?;

        let keep = [
            self.config.static_cache_name.as_str(),
            self.config.dynamic_cache_name.as_str(),
        ];
        let deleted = evict_stale_caches(&self.scope.caches, &keep).await;
        for name in &deleted {
            let _ = self
                .event_tx
                .send(WorkerEvent::CacheDeleted { name: name.clone() });
        }

        self.scope
            .caches
            .write()
            .await
            .open(&self.config.dynamic_cache_name);

        let claimed = self
            .scope
            .clients
            .write()
            .await
            .claim(&self.config.origin, self.id);
        info!(worker = self.id.raw(), clients = claimed, "Clients claimed");
        let _ = self.event_tx.send(WorkerEvent::ClientsClaimed {
            worker_id: self.id,
            count: claimed,
        });

        self.set_state(ServiceWorkerState::Activated).await?;
        Ok(deleted)
    }

    /// Fetch event. Until the worker is activated, requests go straight to
    /// the network.
    pub async fn fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        if !self.lifecycle.read().await.is_active() {
            debug!(url = %request.url, "Worker not active, passing through");
            return Ok(self.scope.fetcher.fetch(request).await?);
        }
        self.router.handle(request).await
    }

    /// Wait for all background work (API mirroring) to finish.
    pub async fn settle(&self) {
        self.router.settle().await;
    }
}
