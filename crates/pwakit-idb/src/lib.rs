//! # PwaKit IDB
//!
//! A small IndexedDB-style object store used by the offline worker to mirror
//! fetched API data.
//!
//! ## Features
//!
//! - **IDBFactory**: `open()` with a versioned upgrade callback, `delete_database()`
//! - **Connection**: cheap, cloneable handle to an opened database
//! - **ObjectStore**: `put` (upsert), `add`, `get`, `get_all`, `delete`, `clear`
//! - **Keys**: in-line key paths or auto-increment counters, ordered like IndexedDB
//!
//! ## Architecture
//!
//! ```text
//! IDBFactory
//!     │
//!     └── Database (name, version)
//!             │
//!             └── ObjectStore
//!                     ├── KeyPath / auto-increment
//!                     └── Records (IdbKey → value)
//! ```
//!
//! Every operation on a [`Connection`] is a single transaction taken under
//! the factory lock, so concurrent callers are serialized and a failed write
//! leaves the store untouched.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

// ==================== Errors ====================

/// IndexedDB errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IDBError {
    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Constraint error: {0}")]
    ConstraintError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid state: {0}")]
    InvalidStateError(String),

    #[error("Version error: {0}")]
    VersionError(String),

    #[error("Upgrade aborted: {0}")]
    AbortError(String),
}

// ==================== Keys ====================

/// A valid record key.
///
/// Keys sort the way IndexedDB sorts them: every number is less than every
/// string, and every string is less than every array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdbKey {
    Number(f64),
    String(String),
    Array(Vec<IdbKey>),
}

impl IdbKey {
    /// Convert a JSON value into a key. Booleans, null, objects and NaN are
    /// not valid keys.
    pub fn from_json(value: &JsonValue) -> Result<Self, IDBError> {
        match value {
            JsonValue::Number(n) => match n.as_f64() {
                // -0.0 and 0.0 are the same key.
                Some(f) if !f.is_nan() => Ok(IdbKey::Number(if f == 0.0 { 0.0 } else { f })),
                _ => Err(IDBError::DataError(format!("Invalid numeric key: {}", n))),
            },
            JsonValue::String(s) => Ok(IdbKey::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(IdbKey::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(IdbKey::Array),
            other => Err(IDBError::DataError(format!("Not a valid key: {}", other))),
        }
    }

    /// Convert back into JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            IdbKey::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            IdbKey::String(s) => JsonValue::String(s.clone()),
            IdbKey::Array(items) => JsonValue::Array(items.iter().map(IdbKey::to_json).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IdbKey::Number(_) => 0,
            IdbKey::String(_) => 1,
            IdbKey::Array(_) => 2,
        }
    }
}

impl Ord for IdbKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IdbKey::Number(a), IdbKey::Number(b)) => a.total_cmp(b),
            (IdbKey::String(a), IdbKey::String(b)) => a.cmp(b),
            (IdbKey::Array(a), IdbKey::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IdbKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IdbKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdbKey {}

impl From<&str> for IdbKey {
    fn from(s: &str) -> Self {
        IdbKey::String(s.to_string())
    }
}

impl From<String> for IdbKey {
    fn from(s: String) -> Self {
        IdbKey::String(s)
    }
}

impl From<u64> for IdbKey {
    fn from(n: u64) -> Self {
        IdbKey::Number(n as f64)
    }
}

/// Key path for object stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    /// No key path (out-of-line keys).
    None,
    /// Single property.
    Single(String),
    /// Multiple properties (compound key).
    Multiple(Vec<String>),
}

impl KeyPath {
    /// Shorthand for a single-property key path.
    pub fn single(field: impl Into<String>) -> Self {
        KeyPath::Single(field.into())
    }

    /// Extract the raw key from a value, if every property is present.
    pub fn extract(&self, value: &JsonValue) -> Option<JsonValue> {
        match self {
            KeyPath::None => None,
            KeyPath::Single(path) => value.get(path).cloned(),
            KeyPath::Multiple(paths) => {
                let keys: Vec<JsonValue> = paths
                    .iter()
                    .filter_map(|p| value.get(p).cloned())
                    .collect();
                if keys.len() == paths.len() {
                    Some(JsonValue::Array(keys))
                } else {
                    None
                }
            }
        }
    }
}

// ==================== ObjectStore ====================

/// An object store: one named collection of records.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    /// Store name.
    pub name: String,

    /// Key path.
    pub key_path: KeyPath,

    /// Auto-increment.
    pub auto_increment: bool,

    /// Records in key order.
    records: BTreeMap<IdbKey, JsonValue>,

    /// Next auto-increment key.
    next_key: u64,
}

impl ObjectStore {
    /// Create a new object store.
    pub fn new(name: &str, key_path: KeyPath, auto_increment: bool) -> Self {
        Self {
            name: name.to_string(),
            key_path,
            auto_increment,
            records: BTreeMap::new(),
            next_key: 1,
        }
    }

    /// Get a record.
    pub fn get(&self, key: &IdbKey) -> Option<&JsonValue> {
        self.records.get(key)
    }

    /// Snapshot of every value, in key order.
    pub fn get_all(&self) -> Vec<JsonValue> {
        self.records.values().cloned().collect()
    }

    /// Snapshot of every key, in order.
    pub fn get_all_keys(&self) -> Vec<IdbKey> {
        self.records.keys().cloned().collect()
    }

    /// Add a record (fails if key exists).
    pub fn add(&mut self, value: JsonValue, key: Option<JsonValue>) -> Result<IdbKey, IDBError> {
        let (key, value) = self.resolve_key(value, key)?;

        if self.records.contains_key(&key) {
            return Err(IDBError::ConstraintError(format!(
                "Key already exists in {}: {}",
                self.name,
                key.to_json()
            )));
        }

        self.commit_key(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    /// Put a record (overwrites if exists).
    pub fn put(&mut self, value: JsonValue, key: Option<JsonValue>) -> Result<IdbKey, IDBError> {
        let (key, value) = self.resolve_key(value, key)?;
        self.commit_key(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    /// Delete a record.
    pub fn delete(&mut self, key: &IdbKey) -> bool {
        self.records.remove(key).is_some()
    }

    /// Clear all records. The auto-increment counter is not reset.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Count records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Work out the key for a value without touching the store.
    fn resolve_key(
        &self,
        mut value: JsonValue,
        key: Option<JsonValue>,
    ) -> Result<(IdbKey, JsonValue), IDBError> {
        match (&self.key_path, key) {
            (KeyPath::None, Some(explicit)) => Ok((IdbKey::from_json(&explicit)?, value)),

            (KeyPath::None, None) if self.auto_increment => {
                Ok((IdbKey::from(self.next_key), value))
            }

            (KeyPath::None, None) => Err(IDBError::DataError(format!(
                "Store {} has no key path and no auto-increment; a key is required",
                self.name
            ))),

            (_, Some(_)) => Err(IDBError::DataError(format!(
                "Store {} uses in-line keys; an explicit key is not allowed",
                self.name
            ))),

            (path, None) => match path.extract(&value) {
                Some(raw) => Ok((IdbKey::from_json(&raw)?, value)),
                None => match path {
                    KeyPath::Single(field) if self.auto_increment => {
                        let key = IdbKey::from(self.next_key);
                        let obj = value.as_object_mut().ok_or_else(|| {
                            IDBError::DataError(format!(
                                "Cannot inject key {} into a non-object value",
                                field
                            ))
                        })?;
                        obj.insert(field.clone(), key.to_json());
                        Ok((key, value))
                    }
                    _ => Err(IDBError::DataError(format!(
                        "Could not extract key {:?} from value in store {}",
                        path, self.name
                    ))),
                },
            },
        }
    }

    /// Advance the generator past numeric keys once a write is accepted.
    fn commit_key(&mut self, key: &IdbKey) {
        if !self.auto_increment {
            return;
        }
        if let IdbKey::Number(n) = key {
            if *n >= self.next_key as f64 {
                self.next_key = n.floor() as u64 + 1;
            }
        }
    }
}

// ==================== Database ====================

/// A database.
#[derive(Debug, Clone)]
pub struct Database {
    /// Database name.
    pub name: String,

    /// Version.
    pub version: u64,

    /// Object stores.
    stores: HashMap<String, ObjectStore>,
}

impl Database {
    /// Create a new, empty database at version 0.
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            stores: HashMap::new(),
        }
    }

    /// Get object store names, sorted.
    pub fn object_store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.keys().cloned().collect();
        names.sort();
        names
    }

    fn store(&self, name: &str) -> Result<&ObjectStore, IDBError> {
        self.stores
            .get(name)
            .ok_or_else(|| IDBError::NotFoundError(format!("Object store not found: {}", name)))
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut ObjectStore, IDBError> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| IDBError::NotFoundError(format!("Object store not found: {}", name)))
    }
}

/// Schema access handed to the upgrade callback of [`IDBFactory::open`].
///
/// Only available while a version change is in progress.
pub struct UpgradeContext<'a> {
    db: &'a mut Database,
    /// Version stored before this open (0 for a new database).
    pub old_version: u64,
    /// Version being opened.
    pub new_version: u64,
}

impl UpgradeContext<'_> {
    /// Names of existing object stores.
    pub fn object_store_names(&self) -> Vec<String> {
        self.db.object_store_names()
    }

    /// Check whether an object store exists.
    pub fn contains(&self, name: &str) -> bool {
        self.db.stores.contains_key(name)
    }

    /// Create an object store. Fails if it already exists.
    pub fn create_object_store(
        &mut self,
        name: &str,
        key_path: KeyPath,
        auto_increment: bool,
    ) -> Result<(), IDBError> {
        if self.contains(name) {
            return Err(IDBError::ConstraintError(format!(
                "Object store already exists: {}",
                name
            )));
        }

        debug!(
            db = %self.db.name,
            store = name,
            ?key_path,
            auto_increment,
            "Creating object store"
        );
        self.db.stores.insert(
            name.to_string(),
            ObjectStore::new(name, key_path, auto_increment),
        );
        Ok(())
    }

    /// Delete an object store.
    pub fn delete_object_store(&mut self, name: &str) -> Result<(), IDBError> {
        self.db.stores.remove(name).ok_or_else(|| {
            IDBError::NotFoundError(format!("Object store not found: {}", name))
        })?;
        Ok(())
    }
}

// ==================== IDBFactory ====================

/// IDBFactory events.
#[derive(Debug, Clone)]
pub enum IDBEvent {
    /// Upgrade needed.
    UpgradeNeeded {
        db_name: String,
        old_version: u64,
        new_version: u64,
    },
    /// Database opened.
    Success { db_name: String, version: u64 },
    /// Error occurred.
    Error { db_name: String, error: IDBError },
    /// Database deleted.
    Deleted { db_name: String },
}

type Databases = Arc<RwLock<HashMap<String, Database>>>;

/// Entry point for opening databases (the `indexedDB` global).
#[derive(Clone)]
pub struct IDBFactory {
    /// Databases.
    databases: Databases,

    /// Event sender.
    event_tx: mpsc::UnboundedSender<IDBEvent>,
}

impl IDBFactory {
    /// Create a new factory.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IDBEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                databases: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Open a database, creating it if needed.
    ///
    /// `upgrade` runs only when `version` is newer than the stored version.
    /// It works on a copy of the schema, so a failing upgrade leaves the
    /// database exactly as it was.
    pub async fn open<F>(
        &self,
        name: &str,
        version: u64,
        upgrade: F,
    ) -> Result<Connection, IDBError>
    where
        F: FnOnce(&mut UpgradeContext<'_>) -> Result<(), IDBError>,
    {
        if version == 0 {
            let error = IDBError::VersionError("Version must be at least 1".into());
            return Err(self.fail(name, error));
        }

        let mut databases = self.databases.write().await;

        let current_version = databases.get(name).map(|db| db.version).unwrap_or(0);

        if version < current_version {
            let error = IDBError::VersionError(format!(
                "Requested version {} is less than current version {}",
                version, current_version
            ));
            return Err(self.fail(name, error));
        }

        if version > current_version {
            info!(
                db = name,
                old_version = current_version,
                new_version = version,
                "Upgrading database"
            );
            let _ = self.event_tx.send(IDBEvent::UpgradeNeeded {
                db_name: name.to_string(),
                old_version: current_version,
                new_version: version,
            });

            let mut staged = databases
                .get(name)
                .cloned()
                .unwrap_or_else(|| Database::new(name));

            let mut ctx = UpgradeContext {
                db: &mut staged,
                old_version: current_version,
                new_version: version,
            };
            if let Err(e) = upgrade(&mut ctx) {
                let error = IDBError::AbortError(e.to_string());
                return Err(self.fail(name, error));
            }

            staged.version = version;
            databases.insert(name.to_string(), staged);
        }

        let _ = self.event_tx.send(IDBEvent::Success {
            db_name: name.to_string(),
            version,
        });

        Ok(Connection {
            name: name.to_string(),
            version,
            databases: Arc::clone(&self.databases),
        })
    }

    /// Delete a database.
    pub async fn delete_database(&self, name: &str) -> Result<(), IDBError> {
        let mut databases = self.databases.write().await;
        if databases.remove(name).is_some() {
            info!(db = name, "Database deleted");
            let _ = self.event_tx.send(IDBEvent::Deleted {
                db_name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Get database names and versions.
    pub async fn databases(&self) -> Vec<DatabaseInfo> {
        let databases = self.databases.read().await;
        let mut infos: Vec<DatabaseInfo> = databases
            .iter()
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                version: db.version,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn fail(&self, name: &str, error: IDBError) -> IDBError {
        warn!(db = name, error = %error, "Database open failed");
        let _ = self.event_tx.send(IDBEvent::Error {
            db_name: name.to_string(),
            error: error.clone(),
        });
        error
    }
}

impl Default for IDBFactory {
    fn default() -> Self {
        Self::new().0
    }
}

/// Database info for the `databases()` API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

// ==================== Connection ====================

/// Handle to an opened database.
///
/// Clones share the same underlying database. Each method is one
/// transaction.
#[derive(Clone)]
pub struct Connection {
    name: String,
    version: u64,
    databases: Databases,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

impl Connection {
    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version this connection was opened at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Names of the object stores.
    pub async fn object_store_names(&self) -> Result<Vec<String>, IDBError> {
        self.read(|db| Ok(db.object_store_names())).await
    }

    /// Upsert a value, deriving its key from the store's key path or counter.
    pub async fn put(&self, store: &str, value: JsonValue) -> Result<IdbKey, IDBError> {
        self.write(store, |s| s.put(value, None)).await
    }

    /// Upsert a value under an explicit key (out-of-line stores only).
    pub async fn put_with_key(
        &self,
        store: &str,
        value: JsonValue,
        key: JsonValue,
    ) -> Result<IdbKey, IDBError> {
        self.write(store, |s| s.put(value, Some(key))).await
    }

    /// Insert a value; fails with a constraint error if the key exists.
    pub async fn add(&self, store: &str, value: JsonValue) -> Result<IdbKey, IDBError> {
        self.write(store, |s| s.add(value, None)).await
    }

    /// Read one value.
    pub async fn get(&self, store: &str, key: &IdbKey) -> Result<Option<JsonValue>, IDBError> {
        self.read(|db| Ok(db.store(store)?.get(key).cloned())).await
    }

    /// Snapshot of all values in key order.
    pub async fn get_all(&self, store: &str) -> Result<Vec<JsonValue>, IDBError> {
        self.read(|db| Ok(db.store(store)?.get_all())).await
    }

    /// Snapshot of all keys in order.
    pub async fn get_all_keys(&self, store: &str) -> Result<Vec<IdbKey>, IDBError> {
        self.read(|db| Ok(db.store(store)?.get_all_keys())).await
    }

    /// Delete one record. Returns whether it existed.
    pub async fn delete(&self, store: &str, key: &IdbKey) -> Result<bool, IDBError> {
        self.write(store, |s| Ok(s.delete(key))).await
    }

    /// Delete every record in a store.
    pub async fn clear(&self, store: &str) -> Result<(), IDBError> {
        self.write(store, |s| {
            s.clear();
            Ok(())
        })
        .await
    }

    /// Count records in a store.
    pub async fn count(&self, store: &str) -> Result<usize, IDBError> {
        self.read(|db| Ok(db.store(store)?.count())).await
    }

    async fn read<R>(
        &self,
        f: impl FnOnce(&Database) -> Result<R, IDBError>,
    ) -> Result<R, IDBError> {
        let databases = self.databases.read().await;
        let db = databases.get(&self.name).ok_or_else(|| self.closed())?;
        f(db)
    }

    /// Run a write against one store. Store methods validate before they
    /// mutate, so an error leaves the store as it was.
    async fn write<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut ObjectStore) -> Result<R, IDBError>,
    ) -> Result<R, IDBError> {
        let mut databases = self.databases.write().await;
        let db = databases.get_mut(&self.name).ok_or_else(|| self.closed())?;
        if db.version != self.version {
            return Err(IDBError::InvalidStateError(format!(
                "Connection to {} at version {} is stale (database is at {})",
                self.name, self.version, db.version
            )));
        }

        let target = db.store_mut(store)?;
        let before = target.count();
        match f(&mut *target) {
            Ok(result) => {
                trace!(db = %self.name, store, before, after = target.count(), "Write committed");
                Ok(result)
            }
            Err(e) => {
                debug!(db = %self.name, store, error = %e, "Write rejected");
                Err(e)
            }
        }
    }

    fn closed(&self) -> IDBError {
        IDBError::InvalidStateError(format!("Database {} is closed or deleted", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posts_upgrade(ctx: &mut UpgradeContext<'_>) -> Result<(), IDBError> {
        if !ctx.contains("posts") {
            ctx.create_object_store("posts", KeyPath::single("id"), false)?;
        }
        Ok(())
    }

    #[test]
    fn test_key_path_single() {
        let path = KeyPath::single("id");
        let value = json!({"id": 42, "name": "test"});

        let key = path.extract(&value).unwrap();
        assert_eq!(key, json!(42));
    }

    #[test]
    fn test_key_path_multiple() {
        let path = KeyPath::Multiple(vec!["a".to_string(), "b".to_string()]);
        let value = json!({"a": 1, "b": 2});

        assert_eq!(path.extract(&value).unwrap(), json!([1, 2]));
        assert!(path.extract(&json!({"a": 1})).is_none());
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            IdbKey::from("b"),
            IdbKey::Array(vec![IdbKey::from(1)]),
            IdbKey::from(10),
            IdbKey::from("a"),
            IdbKey::from(2),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                IdbKey::from(2),
                IdbKey::from(10),
                IdbKey::from("a"),
                IdbKey::from("b"),
                IdbKey::Array(vec![IdbKey::from(1)]),
            ]
        );
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(IdbKey::from_json(&json!(true)), Err(IDBError::DataError(_))));
        assert!(matches!(IdbKey::from_json(&json!(null)), Err(IDBError::DataError(_))));
        assert!(matches!(IdbKey::from_json(&json!({"a": 1})), Err(IDBError::DataError(_))));
        assert!(IdbKey::from_json(&json!(["x", 1])).is_ok());
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let negative = IdbKey::from_json(&json!(-0.0)).unwrap();
        assert_eq!(negative, IdbKey::from_json(&json!(0)).unwrap());

        let mut store = ObjectStore::new("posts", KeyPath::single("id"), false);
        store.put(json!({"id": 0.0, "title": "v1"}), None).unwrap();
        store.put(json!({"id": -0.0, "title": "v2"}), None).unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_object_store_put_overwrites() {
        let mut store = ObjectStore::new("posts", KeyPath::single("id"), false);

        store.put(json!({"id": "first-post", "title": "v1"}), None).unwrap();
        store.put(json!({"id": "first-post", "title": "v2"}), None).unwrap();

        assert_eq!(store.count(), 1);
        let value = store.get(&IdbKey::from("first-post")).unwrap();
        assert_eq!(value["title"], "v2");
    }

    #[test]
    fn test_object_store_add_rejects_duplicate() {
        let mut store = ObjectStore::new("posts", KeyPath::single("id"), false);

        store.add(json!({"id": "a"}), None).unwrap();
        let result = store.add(json!({"id": "a"}), None);
        assert!(matches!(result, Err(IDBError::ConstraintError(_))));
    }

    #[test]
    fn test_object_store_missing_key_is_data_error() {
        let mut store = ObjectStore::new("posts", KeyPath::single("id"), false);

        let result = store.put(json!({"title": "no id"}), None);
        assert!(matches!(result, Err(IDBError::DataError(_))));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_object_store_explicit_key_with_key_path_rejected() {
        let mut store = ObjectStore::new("posts", KeyPath::single("id"), false);
        let result = store.put(json!({"id": 1}), Some(json!(1)));
        assert!(matches!(result, Err(IDBError::DataError(_))));
    }

    #[test]
    fn test_object_store_auto_increment() {
        let mut store = ObjectStore::new("notes", KeyPath::None, true);

        let key1 = store.add(json!({"data": "a"}), None).unwrap();
        let key2 = store.add(json!({"data": "b"}), None).unwrap();

        assert_eq!(key1, IdbKey::from(1));
        assert_eq!(key2, IdbKey::from(2));
    }

    #[test]
    fn test_auto_increment_skips_past_explicit_keys() {
        let mut store = ObjectStore::new("notes", KeyPath::None, true);

        store.put(json!("x"), Some(json!(10))).unwrap();
        let next = store.add(json!("y"), None).unwrap();
        assert_eq!(next, IdbKey::from(11));
    }

    #[test]
    fn test_auto_increment_injects_key_path() {
        let mut store = ObjectStore::new("users", KeyPath::single("id"), true);

        let key = store.add(json!({"name": "Ada"}), None).unwrap();
        assert_eq!(key, IdbKey::from(1));
        assert_eq!(store.get(&key).unwrap()["id"], json!(1.0));
    }

    #[test]
    fn test_out_of_line_requires_key() {
        let mut store = ObjectStore::new("plain", KeyPath::None, false);
        assert!(matches!(
            store.put(json!({"a": 1}), None),
            Err(IDBError::DataError(_))
        ));
        assert!(store.put(json!({"a": 1}), Some(json!("k"))).is_ok());
    }

    #[test]
    fn test_clear_keeps_counter() {
        let mut store = ObjectStore::new("notes", KeyPath::None, true);
        store.add(json!(1), None).unwrap();
        store.clear();
        assert_eq!(store.count(), 0);
        assert_eq!(store.add(json!(2), None).unwrap(), IdbKey::from(2));
    }

    #[tokio::test]
    async fn test_factory_open_runs_upgrade_once() {
        let (factory, _rx) = IDBFactory::new();
        let mut calls = 0;

        factory
            .open("posts-store", 1, |ctx| {
                calls += 1;
                posts_upgrade(ctx)
            })
            .await
            .unwrap();

        factory
            .open("posts-store", 1, |ctx| {
                calls += 1;
                posts_upgrade(ctx)
            })
            .await
            .unwrap();

        assert_eq!(calls, 1);

        let dbs = factory.databases().await;
        assert_eq!(
            dbs,
            vec![DatabaseInfo {
                name: "posts-store".to_string(),
                version: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_factory_upgrade_keeps_existing_data() {
        let (factory, _rx) = IDBFactory::new();

        let conn = factory.open("posts-store", 1, posts_upgrade).await.unwrap();
        conn.put("posts", json!({"id": "p1"})).await.unwrap();

        let conn = factory
            .open("posts-store", 2, |ctx| {
                assert_eq!(ctx.old_version, 1);
                assert_eq!(ctx.new_version, 2);
                posts_upgrade(ctx)?;
                ctx.create_object_store("notes", KeyPath::None, true)
            })
            .await
            .unwrap();

        assert_eq!(conn.count("posts").await.unwrap(), 1);
        assert_eq!(
            conn.object_store_names().await.unwrap(),
            vec!["notes".to_string(), "posts".to_string()]
        );
    }

    #[tokio::test]
    async fn test_factory_rejects_downgrade() {
        let (factory, mut rx) = IDBFactory::new();

        factory.open("db", 3, |_| Ok(())).await.unwrap();
        let result = factory.open("db", 2, |_| Ok(())).await;
        assert!(matches!(result, Err(IDBError::VersionError(_))));

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, IDBEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_database_unchanged() {
        let (factory, _rx) = IDBFactory::new();
        factory.open("db", 1, posts_upgrade).await.unwrap();

        let result = factory
            .open("db", 2, |ctx| ctx.create_object_store("posts", KeyPath::None, false))
            .await;
        assert!(matches!(result, Err(IDBError::AbortError(_))));

        let dbs = factory.databases().await;
        assert_eq!(dbs[0].version, 1);
    }

    #[tokio::test]
    async fn test_connection_crud() {
        let (factory, _rx) = IDBFactory::new();
        let conn = factory.open("posts-store", 1, posts_upgrade).await.unwrap();

        conn.put("posts", json!({"id": "b", "title": "B"})).await.unwrap();
        conn.put("posts", json!({"id": "a", "title": "A"})).await.unwrap();

        let all = conn.get_all("posts").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["id"], "a");

        assert!(conn.delete("posts", &IdbKey::from("a")).await.unwrap());
        assert!(!conn.delete("posts", &IdbKey::from("a")).await.unwrap());
        assert_eq!(conn.count("posts").await.unwrap(), 1);

        conn.clear("posts").await.unwrap();
        assert!(conn.get_all("posts").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_unknown_store() {
        let (factory, _rx) = IDBFactory::new();
        let conn = factory.open("db", 1, |_| Ok(())).await.unwrap();

        let result = conn.get_all("missing").await;
        assert!(matches!(result, Err(IDBError::NotFoundError(_))));
    }

    #[tokio::test]
    async fn test_connection_after_delete_is_invalid() {
        let (factory, _rx) = IDBFactory::new();
        let conn = factory.open("db", 1, posts_upgrade).await.unwrap();

        factory.delete_database("db").await.unwrap();
        let result = conn.put("posts", json!({"id": 1})).await;
        assert!(matches!(result, Err(IDBError::InvalidStateError(_))));
    }

    #[tokio::test]
    async fn test_get_all_is_a_snapshot() {
        let (factory, _rx) = IDBFactory::new();
        let conn = factory.open("db", 1, posts_upgrade).await.unwrap();

        conn.put("posts", json!({"id": 1})).await.unwrap();
        let snapshot = conn.get_all("posts").await.unwrap();
        conn.put("posts", json!({"id": 2})).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(conn.get_all("posts").await.unwrap().len(), 2);
    }
}
