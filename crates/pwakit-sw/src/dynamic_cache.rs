//! Runtime cache of previously fetched non-shell resources.

use pwakit_net::{Request, Response};
use tracing::{debug, trace};
use url::Url;

use crate::cache::SharedCaches;

/// Dynamic cache manager for one generation.
#[derive(Clone)]
pub struct DynamicCache {
    caches: SharedCaches,
    name: String,
    limit: Option<usize>,
}

impl DynamicCache {
    /// `limit` caps the entry count; the oldest entries are trimmed first.
    pub fn new(caches: SharedCaches, name: &str, limit: Option<usize>) -> Self {
        Self {
            caches,
            name: name.to_string(),
            limit,
        }
    }

    /// Generation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact lookup by request URL.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let caches = self.caches.read().await;
        let hit = caches.get(&self.name)?.match_request(request.url.as_str());
        trace!(cache = %self.name, url = %request.url, hit = hit.is_some(), "Dynamic cache lookup");
        hit
    }

    /// Store a snapshot keyed by full URL, creating the generation if
    /// needed. Returns the keys evicted to stay under the limit.
    pub async fn store(&self, url: &Url, response: Response) -> Vec<String> {
        let mut caches = self.caches.write().await;
        let cache = caches.open(&self.name);
        cache.put(url.as_str(), response);

        let evicted = match self.limit {
            Some(max) => cache.trim(max),
            None => Vec::new(),
        };

        debug!(
            cache = %self.name,
            url = %url,
            entries = cache.len(),
            evicted = evicted.len(),
            "Stored runtime response"
        );
        evicted
    }

    /// Number of entries in this generation.
    pub async fn len(&self) -> usize {
        let caches = self.caches.read().await;
        caches.get(&self.name).map(|c| c.len()).unwrap_or(0)
    }
}
