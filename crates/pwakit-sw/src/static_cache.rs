//! App-shell precache.
//!
//! The static generation is filled once at install and never mutated
//! afterwards. Install is all-or-nothing: one unreachable resource fails the
//! whole install and leaves no partial generation behind.

use futures::future::try_join_all;
use pwakit_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::{Position, Url};

use crate::cache::SharedCaches;
use crate::ServiceWorkerError;

/// Ordered set of resources that make up the application shell.
#[derive(Debug, Clone)]
pub struct StaticManifest {
    origin: Url,
    entries: Vec<(String, Url)>,
}

impl StaticManifest {
    /// Resolve manifest entries against the worker origin.
    pub fn new(origin: &Url, entries: &[String]) -> Result<Self, ServiceWorkerError> {
        let entries = entries
            .iter()
            .map(|entry| {
                origin
                    .join(entry)
                    .map(|url| (entry.clone(), url))
                    .map_err(|e| {
                        ServiceWorkerError::Config(format!("bad manifest entry {}: {}", entry, e))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin: origin.clone(),
            entries,
        })
    }

    /// Lookup key for a URL: the path (with query) for same-origin URLs,
    /// the full URL otherwise.
    pub fn key_for(&self, url: &Url) -> String {
        if url.origin() == self.origin.origin() {
            url[Position::BeforePath..].to_string()
        } else {
            url.as_str().to_string()
        }
    }

    /// Whether a URL is part of the shell.
    pub fn contains(&self, url: &Url) -> bool {
        let key = self.key_for(url);
        self.entries
            .iter()
            .any(|(_, resolved)| self.key_for(resolved) == key)
    }

    /// Resolve a path or absolute URL against the origin.
    pub fn resolve(&self, entry: &str) -> Option<Url> {
        self.origin.join(entry).ok()
    }

    /// Resolved URLs, in manifest order.
    pub fn urls(&self) -> impl Iterator<Item = &Url> {
        self.entries.iter().map(|(_, url)| url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Static cache manager for one generation.
#[derive(Clone)]
pub struct StaticCache {
    caches: SharedCaches,
    name: String,
    manifest: StaticManifest,
}

impl StaticCache {
    pub fn new(caches: SharedCaches, name: &str, manifest: StaticManifest) -> Self {
        Self {
            caches,
            name: name.to_string(),
            manifest,
        }
    }

    /// Generation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &StaticManifest {
        &self.manifest
    }

    /// Fetch every manifest resource and store them in one step.
    ///
    /// Any transport failure or non-2xx status fails the install and
    /// nothing is written.
    pub async fn install(&self, fetcher: &dyn Fetcher) -> Result<usize, ServiceWorkerError> {
        info!(cache = %self.name, resources = self.manifest.len(), "Precaching app shell");

        let fetches = self.manifest.urls().map(|url| async move {
            let response = fetcher
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }

            debug!(url = %url, bytes = response.body_len(), "Fetched shell resource");
            Ok::<(String, Response), ServiceWorkerError>((url.to_string(), response))
        });

        let fetched = match try_join_all(fetches).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(cache = %self.name, error = %e, "Precache failed");
                return Err(e);
            }
        };

        let mut caches = self.caches.write().await;
        let cache = caches.open(&self.name);
        for (url, response) in fetched {
            cache.put(&url, response);
        }

        info!(cache = %self.name, entries = cache.len(), "App shell precached");
        Ok(cache.len())
    }

    /// Exact lookup of a precached resource by path or absolute URL.
    /// Never touches the network.
    pub async fn match_path(&self, path: &str) -> Option<Response> {
        let url = self.manifest.resolve(path)?;
        self.match_url(&url).await
    }

    /// Exact lookup by URL.
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        let caches = self.caches.read().await;
        caches.get(&self.name)?.match_request(url.as_str())
    }
}
