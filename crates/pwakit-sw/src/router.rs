//! Fetch routing.
//!
//! Every intercepted request takes exactly one route, checked in order:
//!
//! 1. [`Route::RemoteRefresh`]: the URL contains the configured API endpoint.
//!    Always fetched live; a copy of the response is mirrored into the store
//!    in the background.
//! 2. [`Route::StaticAsset`]: the URL is an app-shell manifest entry. Served
//!    from the static cache only.
//! 3. [`Route::Fallback`]: everything else, served per
//!    [`FallbackStrategy`].

use pwakit_net::{Fetcher, Request, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::SharedCaches;
use crate::config::{FallbackStrategy, WorkerConfig};
use crate::dynamic_cache::DynamicCache;
use crate::events::WorkerEvent;
use crate::mirror::Mirror;
use crate::static_cache::{StaticCache, StaticManifest};
use crate::ServiceWorkerError;

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    RemoteRefresh,
    StaticAsset,
    Fallback,
}

/// Classify a request URL. API matching is a substring test on the full URL.
pub fn classify(remote_endpoint: &str, manifest: &StaticManifest, url: &Url) -> Route {
    if url.as_str().contains(remote_endpoint) {
        Route::RemoteRefresh
    } else if manifest.contains(url) {
        Route::StaticAsset
    } else {
        Route::Fallback
    }
}

/// Executes the caching policy for intercepted requests.
pub struct FetchRouter {
    remote_endpoint: String,
    collection: String,
    offline_page: String,
    strategy: FallbackStrategy,
    static_cache: StaticCache,
    dynamic_cache: DynamicCache,
    caches: SharedCaches,
    mirror: Arc<Mirror>,
    fetcher: Arc<dyn Fetcher>,
    background: Mutex<Vec<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl FetchRouter {
    pub fn new(
        config: &WorkerConfig,
        static_cache: StaticCache,
        dynamic_cache: DynamicCache,
        caches: SharedCaches,
        mirror: Arc<Mirror>,
        fetcher: Arc<dyn Fetcher>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            remote_endpoint: config.remote_endpoint.clone(),
            collection: config.mirror_collection.clone(),
            offline_page: config.offline_page.clone(),
            strategy: config.fallback_strategy,
            static_cache,
            dynamic_cache,
            caches,
            mirror,
            fetcher,
            background: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Route for `request`.
    pub fn route(&self, request: &Request) -> Route {
        classify(&self.remote_endpoint, self.static_cache.manifest(), &request.url)
    }

    /// Produce the response for an intercepted request.
    pub async fn handle(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let route = self.route(&request);
        trace!(url = %request.url, method = %request.method, ?route, "Routing request");

        // Caches only hold GET responses; other methods always go out.
        if route != Route::RemoteRefresh && !request.is_get() {
            return self.fetch_or_offline_page(request).await;
        }

        match route {
            Route::RemoteRefresh => self.remote_refresh(request).await,
            Route::StaticAsset => self.static_asset(&request).await,
            Route::Fallback => match self.strategy {
                FallbackStrategy::CacheThenNetwork => self.cache_then_network(request).await,
                FallbackStrategy::NetworkFirst => self.network_first(request).await,
                FallbackStrategy::CacheOnly => self.cache_only(&request).await,
                FallbackStrategy::NetworkOnly => Ok(self.fetcher.fetch(request).await?),
            },
        }
    }

    /// Wait for every background mirror task started so far, including any
    /// started while waiting.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.background.lock().await);
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task did not complete");
                }
            }
        }
    }

    async fn remote_refresh(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let url = request.url.clone();
        let response = self.fetcher.fetch(request).await?;
        debug!(url = %url, status = %response.status, "Fetched API data");

        let copy = response.clone();
        let mirror = Arc::clone(&self.mirror);
        let collection = self.collection.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let result = mirror.refresh(&collection, copy).await;
            let event = match result {
                Ok(report) => WorkerEvent::MirrorCompleted {
                    collection,
                    written: report.written,
                    skipped: report.skipped,
                },
                Err(e) => {
                    warn!(collection = %collection, url = %url, error = %e, "Mirroring failed");
                    WorkerEvent::MirrorFailed {
                        collection,
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });

        let mut background = self.background.lock().await;
        background.retain(|h| !h.is_finished());
        background.push(handle);

        Ok(response)
    }

    async fn static_asset(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        match self.static_cache.match_url(&request.url).await {
            Some(response) => {
                trace!(url = %request.url, "Served from app shell");
                Ok(response)
            }
            None => {
                warn!(
                    url = %request.url,
                    cache = %self.static_cache.name(),
                    "Shell resource missing from cache"
                );
                Err(ServiceWorkerError::CacheMiss(request.url.to_string()))
            }
        }
    }

    async fn cache_then_network(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        if let Some(hit) = self.dynamic_cache.match_request(&request).await {
            return Ok(hit);
        }
        self.fetch_or_offline_page(request).await
    }

    /// Fetch, storing GET responses in the dynamic cache. A failed document
    /// request gets the precached offline page instead.
    async fn fetch_or_offline_page(
        &self,
        request: Request,
    ) -> Result<Response, ServiceWorkerError> {
        let url = request.url.clone();
        let wants_html = request.accepts_html();
        let cacheable = request.is_get();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if cacheable {
                    self.store_dynamic(&url, &response).await;
                }
                Ok(response)
            }
            Err(e) if wants_html => match self.static_cache.match_path(&self.offline_page).await {
                Some(page) => {
                    info!(url = %url, error = %e, "Serving offline page");
                    let _ = self.events.send(WorkerEvent::OfflineFallback {
                        url: url.to_string(),
                    });
                    Ok(page)
                }
                None => {
                    warn!(url = %url, page = %self.offline_page, "Offline page not cached");
                    Err(e.into())
                }
            },
            Err(e) => {
                debug!(url = %url, error = %e, "Fetch failed, nothing to substitute");
                Err(e.into())
            }
        }
    }

    async fn network_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let url = request.url.clone();
        let cacheable = request.is_get();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if cacheable {
                    self.store_dynamic(&url, &response).await;
                }
                Ok(response)
            }
            Err(e) => {
                let cached = self.caches.read().await.match_request(url.as_str());
                match cached {
                    Some(hit) => {
                        debug!(url = %url, error = %e, "Network failed, serving cached copy");
                        Ok(hit)
                    }
                    None => Err(e.into()),
                }
            }
        }
    }

    async fn cache_only(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        self.caches
            .read()
            .await
            .match_request(request.url.as_str())
            .ok_or_else(|| ServiceWorkerError::CacheMiss(request.url.to_string()))
    }

    async fn store_dynamic(&self, url: &Url, response: &Response) {
        let evicted = self.dynamic_cache.store(url, response.clone()).await;
        if !evicted.is_empty() {
            debug!(
                cache = %self.dynamic_cache.name(),
                evicted = evicted.len(),
                "Trimmed runtime cache"
            );
            let _ = self.events.send(WorkerEvent::DynamicCacheTrimmed {
                cache: self.dynamic_cache.name().to_string(),
                evicted,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::mirror::open_mirror_store;
    use async_trait::async_trait;
    use hashbrown::HashMap;
    use pwakit_idb::IDBFactory;
    use pwakit_net::NetError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeNetwork {
        offline: AtomicBool,
        bodies: std::sync::Mutex<HashMap<String, String>>,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn serve(&self, url: &str, body: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }
    }

    #[async_trait]
    impl Fetcher for FakeNetwork {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::ConnectionFailed("offline".to_string()));
            }
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| "ok".to_string());
            Ok(Response::ok_with(request.url, "text/plain", body))
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            static_manifest: vec!["/".to_string(), "/offline.html".to_string()],
            remote_endpoint: "https://api.example.com/posts".to_string(),
            ..Default::default()
        }
    }

    async fn router(
        config: &WorkerConfig,
        network: Arc<FakeNetwork>,
    ) -> (FetchRouter, mpsc::UnboundedReceiver<WorkerEvent>) {
        build_router(config, network, true).await
    }

    async fn build_router(
        config: &WorkerConfig,
        network: Arc<FakeNetwork>,
        precache: bool,
    ) -> (FetchRouter, mpsc::UnboundedReceiver<WorkerEvent>) {
        let caches = CacheStorage::shared();
        let manifest = StaticManifest::new(&config.origin, &config.static_manifest).unwrap();
        let static_cache = StaticCache::new(caches.clone(), &config.static_cache_name, manifest);
        if precache {
            static_cache.install(network.as_ref()).await.unwrap();
        }

        let dynamic_cache = DynamicCache::new(
            caches.clone(),
            &config.dynamic_cache_name,
            config.dynamic_cache_limit,
        );
        let (factory, _rx) = IDBFactory::new();
        let mirror = Arc::new(Mirror::new(open_mirror_store(&factory, config).await.unwrap()));
        let (tx, rx) = mpsc::unbounded_channel();

        let router = FetchRouter::new(
            config,
            static_cache,
            dynamic_cache,
            caches,
            mirror,
            network,
            tx,
        );
        (router, rx)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_classify_priority() {
        let config = config();
        let manifest = StaticManifest::new(&config.origin, &config.static_manifest).unwrap();
        let endpoint = config.remote_endpoint.as_str();

        assert_eq!(
            classify(endpoint, &manifest, &url("https://api.example.com/posts.json")),
            Route::RemoteRefresh
        );
        assert_eq!(
            classify(endpoint, &manifest, &url("http://localhost:8080/")),
            Route::StaticAsset
        );
        assert_eq!(
            classify(endpoint, &manifest, &url("http://localhost:8080/help")),
            Route::Fallback
        );
    }

    #[test]
    fn test_endpoint_wins_over_manifest() {
        let manifest = StaticManifest::new(
            &url("http://localhost:8080"),
            &["https://api.example.com/posts.json".to_string()],
        )
        .unwrap();

        let api = url("https://api.example.com/posts.json");
        assert_eq!(
            classify("api.example.com/posts", &manifest, &api),
            Route::RemoteRefresh
        );
    }

    #[tokio::test]
    async fn test_static_asset_never_hits_network() {
        let network = Arc::new(FakeNetwork::default());
        let (router, _rx) = router(&config(), network.clone()).await;
        let installed = network.calls.load(Ordering::SeqCst);

        let response = router
            .handle(Request::parse("http://localhost:8080/").unwrap())
            .await
            .unwrap();

        assert!(response.from_cache);
        assert_eq!(network.calls.load(Ordering::SeqCst), installed);
    }

    #[tokio::test]
    async fn test_fallback_populates_dynamic_cache() {
        let network = Arc::new(FakeNetwork::default());
        network.serve("http://localhost:8080/help", "help page");
        let (router, _rx) = router(&config(), network.clone()).await;

        let first = router
            .handle(Request::parse("http://localhost:8080/help").unwrap())
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.text().unwrap(), "help page");

        let calls = network.calls.load(Ordering::SeqCst);
        let second = router
            .handle(Request::parse("http://localhost:8080/help").unwrap())
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.text().unwrap(), "help page");
        assert_eq!(network.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_post_is_not_cached() {
        let network = Arc::new(FakeNetwork::default());
        let (router, _rx) = router(&config(), network.clone()).await;

        let post = Request::post(url("http://localhost:8080/submit"), "x".into());
        router.handle(post).await.unwrap();

        assert_eq!(router.dynamic_cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_offline_html_gets_offline_page() {
        let network = Arc::new(FakeNetwork::default());
        network.serve("http://localhost:8080/offline.html", "<h1>offline</h1>");
        let (router, mut rx) = router(&config(), network.clone()).await;
        network.offline.store(true, Ordering::SeqCst);

        let request = Request::parse("http://localhost:8080/help")
            .unwrap()
            .accept("text/html");
        let response = router.handle(request).await.unwrap();

        assert_eq!(response.text().unwrap(), "<h1>offline</h1>");
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkerEvent::OfflineFallback {
                url: "http://localhost:8080/help".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_offline_json_is_not_masked() {
        let network = Arc::new(FakeNetwork::default());
        let (router, _rx) = router(&config(), network.clone()).await;
        network.offline.store(true, Ordering::SeqCst);

        let request = Request::parse("http://localhost:8080/data.json")
            .unwrap()
            .accept("application/json");
        let result = router.handle(request).await;

        assert!(result.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_remote_refresh_mirrors_in_background() {
        let network = Arc::new(FakeNetwork::default());
        let body = r#"{"a": {"id": "a", "title": "A"}}"#;
        network.serve("https://api.example.com/posts.json", body);
        let (router, mut rx) = router(&config(), network.clone()).await;

        let response = router
            .handle(Request::parse("https://api.example.com/posts.json").unwrap())
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), body);

        router.settle().await;
        assert_eq!(router.mirror.store().count("posts").await.unwrap(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkerEvent::MirrorCompleted {
                collection: "posts".to_string(),
                written: 1,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_reach_caller() {
        let network = Arc::new(FakeNetwork::default());
        network.serve("https://api.example.com/posts.json", "not json");
        let (router, mut rx) = router(&config(), network.clone()).await;

        let response = router
            .handle(Request::parse("https://api.example.com/posts.json").unwrap())
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "not json");

        router.settle().await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkerEvent::MirrorFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cache_only_misses() {
        let network = Arc::new(FakeNetwork::default());
        let config = WorkerConfig {
            fallback_strategy: FallbackStrategy::CacheOnly,
            ..config()
        };
        let (router, _rx) = router(&config, network.clone()).await;

        let result = router
            .handle(Request::parse("http://localhost:8080/help").unwrap())
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_network_first_refreshes_cached_copy() {
        let network = Arc::new(FakeNetwork::default());
        network.serve("http://localhost:8080/news", "v1");
        let config = WorkerConfig {
            fallback_strategy: FallbackStrategy::NetworkFirst,
            ..config()
        };
        let (router, _rx) = router(&config, network.clone()).await;
        let request = || Request::parse("http://localhost:8080/news").unwrap();

        router.handle(request()).await.unwrap();
        network.serve("http://localhost:8080/news", "v2");
        let live = router.handle(request()).await.unwrap();
        assert!(!live.from_cache);
        assert_eq!(live.text().unwrap(), "v2");

        network.offline.store(true, Ordering::SeqCst);
        let cached = router.handle(request()).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.text().unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_post_after_get_reaches_network() {
        let network = Arc::new(FakeNetwork::default());
        network.serve("http://localhost:8080/comments", "[]");
        let (router, _rx) = router(&config(), network.clone()).await;

        router
            .handle(Request::parse("http://localhost:8080/comments").unwrap())
            .await
            .unwrap();
        let before = network.calls.load(Ordering::SeqCst);

        let post = Request::post(url("http://localhost:8080/comments"), "text=hi".into());
        let response = router.handle(post).await.unwrap();

        assert!(!response.from_cache);
        assert_eq!(network.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_post_to_shell_url_is_not_served_from_cache() {
        let network = Arc::new(FakeNetwork::default());
        let (router, _rx) = router(&config(), network.clone()).await;
        let before = network.calls.load(Ordering::SeqCst);

        let post = Request::post(url("http://localhost:8080/"), "x".into());
        let response = router.handle(post).await.unwrap();

        assert!(!response.from_cache);
        assert_eq!(network.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_cache_only_sends_post_to_network() {
        let network = Arc::new(FakeNetwork::default());
        let config = WorkerConfig {
            fallback_strategy: FallbackStrategy::CacheOnly,
            ..config()
        };
        let (router, _rx) = router(&config, network.clone()).await;

        let post = Request::post(url("http://localhost:8080/submit"), "x".into());
        assert!(!router.handle(post).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_missing_shell_entry_is_cache_miss() {
        let network = Arc::new(FakeNetwork::default());
        let (router, _rx) = build_router(&config(), network.clone(), false).await;

        let result = router
            .handle(Request::parse("http://localhost:8080/").unwrap())
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::CacheMiss(_))));
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_offline_page_keeps_network_error() {
        let network = Arc::new(FakeNetwork::default());
        let (router, mut rx) = build_router(&config(), network.clone(), false).await;
        network.offline.store(true, Ordering::SeqCst);

        let request = Request::parse("http://localhost:8080/help")
            .unwrap()
            .accept("text/html");
        let result = router.handle(request).await;

        assert!(result.unwrap_err().is_network());
        assert!(rx.try_recv().is_err());
    }
}
