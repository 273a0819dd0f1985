//! Mirroring of API responses into the persistent store.
//!
//! A refresh decodes the payload first, then clears the collection and
//! upserts each record. The collection is locked for the whole clear+write
//! phase so overlapping refreshes of one collection run one after the other.

use hashbrown::HashMap;
use pwakit_idb::{Connection, IDBError, IDBFactory, KeyPath};
use pwakit_net::Response;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::ServiceWorkerError;

/// Field every mirrored record is keyed by.
pub const RECORD_KEY: &str = "id";

/// Outcome of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorReport {
    /// Records upserted.
    pub written: usize,
    /// Records rejected by the store (e.g. missing key).
    pub skipped: usize,
}

/// Open the mirror database, creating the collection on first use.
pub async fn open_mirror_store(
    factory: &IDBFactory,
    config: &WorkerConfig,
) -> Result<Connection, IDBError> {
    let collection = config.mirror_collection.clone();
    factory
        .open(&config.database_name, config.database_version, move |ctx| {
            if !ctx.contains(&collection) {
                ctx.create_object_store(&collection, KeyPath::single(RECORD_KEY), false)?;
            }
            Ok(())
        })
        .await
}

/// Decode an API payload into the records to store.
///
/// The payload is a keyed collection (`{"first-post": {...}, ...}`); the
/// values are the records. A JSON array is accepted too, and `null` (an
/// empty collection) decodes to no records.
pub fn decode_records(payload: JsonValue) -> Result<Vec<JsonValue>, ServiceWorkerError> {
    match payload {
        JsonValue::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        JsonValue::Array(items) => Ok(items.into_iter().filter(|v| !v.is_null()).collect()),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(ServiceWorkerError::Decode(format!(
            "expected a keyed collection, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Writes API payloads into store collections.
pub struct Mirror {
    store: Connection,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Mirror {
    pub fn new(store: Connection) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store connection.
    pub fn store(&self) -> &Connection {
        &self.store
    }

    async fn lock_for(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Replace the contents of `collection` with the records in `response`.
    ///
    /// Decode errors leave the collection untouched. A record the store
    /// rejects is skipped; the rest are still written.
    pub async fn refresh(
        &self,
        collection: &str,
        response: Response,
    ) -> Result<MirrorReport, ServiceWorkerError> {
        let payload: JsonValue = response
            .json()
            .map_err(|e| ServiceWorkerError::Decode(e.to_string()))?;
        let records = decode_records(payload)?;

        let lock = self.lock_for(collection).await;
        let _guard = lock.lock().await;

        self.store.clear(collection).await?;
        debug!(collection, records = records.len(), "Cleared collection for refresh");

        let mut report = MirrorReport {
            written: 0,
            skipped: 0,
        };
        for record in records {
            match self.store.put(collection, record).await {
                Ok(_) => report.written += 1,
                Err(e) => {
                    warn!(collection, error = %e, "Skipping record");
                    report.skipped += 1;
                }
            }
        }

        info!(
            collection,
            written = report.written,
            skipped = report.skipped,
            "Mirrored API data"
        );
        Ok(report)
    }
}
