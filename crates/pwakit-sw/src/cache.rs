//! Cache API: named cache generations holding response snapshots.

use hashbrown::HashMap;
use pwakit_net::Response;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cache storage shared between the router, the lifecycle manager and
/// successive worker versions.
pub type SharedCaches = Arc<RwLock<CacheStorage>>;

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request key (full URL).
    pub url: String,

    /// Stored response snapshot.
    pub response: Response,
}

/// A cache instance.
///
/// Entries remember their insertion order so the oldest can be trimmed
/// first.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,

    /// Keys, oldest first.
    order: VecDeque<String>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Match a request. Every hit is an independent copy of the snapshot.
    pub fn match_request(&self, url: &str) -> Option<Response> {
        self.entries.get(url).map(|entry| entry.response.cached_copy())
    }

    /// Store a response, replacing any entry with the same key.
    ///
    /// A replaced entry moves to the back of the insertion order.
    pub fn put(&mut self, url: &str, response: Response) {
        if self.entries.contains_key(url) {
            self.order.retain(|k| k != url);
        }
        self.order.push_back(url.to_string());

        let entry = CacheEntry {
            url: url.to_string(),
            response,
        };
        self.entries.insert(url.to_string(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        if self.entries.remove(url).is_some() {
            self.order.retain(|k| k != url);
            true
        } else {
            false
        }
    }

    /// Keys, oldest first.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest entries until at most `max_items` remain.
    /// Returns the evicted keys, oldest first.
    pub fn trim(&mut self, max_items: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.order.len() > max_items {
            match self.order.pop_front() {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new storage wrapped for sharing.
    pub fn shared() -> SharedCaches {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match across all caches, in name order.
    pub fn match_request(&self, url: &str) -> Option<Response> {
        self.keys()
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(url))
    }
}
