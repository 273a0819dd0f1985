//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::static_cache::StaticManifest;
use crate::ServiceWorkerError;

/// How requests that are neither API calls nor app-shell assets are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    /// Runtime cache, then network (stored on success), then the offline
    /// page for document requests.
    #[default]
    CacheThenNetwork,
    /// Network (stored on success), then any cached copy.
    NetworkFirst,
    /// Cached copies only.
    CacheOnly,
    /// Network only, nothing stored.
    NetworkOnly,
}

/// Immutable worker configuration, handed to the worker at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is served from. Same-origin manifest entries are
    /// written as paths relative to it.
    pub origin: Url,

    /// Name of the current static (app shell) cache generation
    pub static_cache_name: String,

    /// Name of the current dynamic (runtime) cache generation
    pub dynamic_cache_name: String,

    /// Resources precached at install, as paths or absolute URLs
    pub static_manifest: Vec<String>,

    /// Page served when a document request fails offline; must be in the manifest
    pub offline_page: String,

    /// Any request whose URL contains this string is refreshed from the
    /// network and mirrored into the store
    pub remote_endpoint: String,

    /// Store collection that receives mirrored records
    pub mirror_collection: String,

    /// Persistent store database name
    pub database_name: String,

    /// Persistent store schema version
    pub database_version: u64,

    /// Maximum entries kept in the dynamic cache (`None` = unbounded)
    pub dynamic_cache_limit: Option<usize>,

    /// Strategy for everything that is not an API call or a shell asset
    pub fallback_strategy: FallbackStrategy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080").expect("static origin is valid"),
            static_cache_name: "static-v18".to_string(),
            dynamic_cache_name: "dynamic-v2".to_string(),
            static_manifest: default_manifest(),
            offline_page: "/offline.html".to_string(),
            remote_endpoint: "https://pwa-test-e5885-default-rtdb.firebaseio.com/posts".to_string(),
            mirror_collection: "posts".to_string(),
            database_name: "posts-store".to_string(),
            database_version: 1,
            dynamic_cache_limit: None,
            fallback_strategy: FallbackStrategy::default(),
        }
    }
}

fn default_manifest() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/offline.html",
        "/src/js/app.js",
        "/src/js/feed.js",
        "/src/js/idb.js",
        "/src/js/promise.js",
        "/src/js/fetch.js",
        "/src/js/material.min.js",
        "/src/css/app.css",
        "/src/css/feed.css",
        "/src/images/main-image.jpg",
        "https://fonts.googleapis.com/css?family=Roboto:400,700",
        "https://fonts.googleapis.com/icon?family=Material+Icons",
        "https://cdnjs.cloudflare.com/ajax/libs/material-design-lite/1.3.0/material.indigo-pink.min.css",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl WorkerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.static_cache_name.is_empty() || self.dynamic_cache_name.is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache names must not be empty".to_string(),
            ));
        }
        if self.static_cache_name == self.dynamic_cache_name {
            return Err(ServiceWorkerError::Config(format!(
                "static and dynamic caches share the name {}",
                self.static_cache_name
            )));
        }
        if self.database_version == 0 {
            return Err(ServiceWorkerError::Config(
                "database_version must be at least 1".to_string(),
            ));
        }
        if self.remote_endpoint.is_empty() {
            return Err(ServiceWorkerError::Config(
                "remote_endpoint must not be empty".to_string(),
            ));
        }
        if self.mirror_collection.is_empty() || self.database_name.is_empty() {
            return Err(ServiceWorkerError::Config(
                "database_name and mirror_collection must not be empty".to_string(),
            ));
        }
        if self.dynamic_cache_limit == Some(0) {
            return Err(ServiceWorkerError::Config(
                "dynamic_cache_limit must be at least 1 when set".to_string(),
            ));
        }
        let manifest = StaticManifest::new(&self.origin, &self.static_manifest)?;
        let offline_page = manifest.resolve(&self.offline_page).ok_or_else(|| {
            ServiceWorkerError::Config(format!("bad offline page {}", self.offline_page))
        })?;
        if !manifest.contains(&offline_page) {
            return Err(ServiceWorkerError::Config(format!(
                "offline page {} is not in the static manifest",
                self.offline_page
            )));
        }
        Ok(())
    }
}
