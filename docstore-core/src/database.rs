// docstore-core/src/database.rs
// Database handle: owns the named collections and the storage backend

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregation::LookupSource;
use crate::collection_core::schema::CompiledSchema;
use crate::collection_core::{Collection, CollectionData};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{DocStoreError, Result};
use crate::storage::{CollectionSnapshot, FileStorage, MemoryStorage, Storage, StoreSnapshot};
use crate::transaction::{Session, TransactionId};

/// Options for `Database::create_collection`
#[derive(Debug, Clone, Default)]
pub struct CreateCollectionOptions {
    /// `{"$jsonSchema": {...}}` or a bare schema body
    pub validator: Option<Value>,
}

impl CreateCollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: Value) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// State shared by every handle of one database
pub(crate) struct DatabaseInner {
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    /// Ordered by name; commit and persist lock collections in this order
    collections: RwLock<BTreeMap<String, Arc<RwLock<CollectionData>>>>,
    next_tx_id: AtomicU64,
    /// Serializes snapshot-and-save; under `Durability::OnWrite` it is held
    /// across each write so memory never runs ahead of the backend
    persist_lock: Mutex<()>,
}

impl DatabaseInner {
    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared state of `name`, created empty when missing
    pub(crate) fn collection_data(&self, name: &str) -> Arc<RwLock<CollectionData>> {
        if let Some(data) = self.collections.read().get(name) {
            return Arc::clone(data);
        }
        let mut collections = self.collections.write();
        Arc::clone(collections.entry(name.to_string()).or_insert_with(|| {
            debug!(collection = name, "collection created");
            Arc::new(RwLock::new(CollectionData::new()))
        }))
    }

    fn existing_data(&self, name: &str) -> Option<Arc<RwLock<CollectionData>>> {
        self.collections.read().get(name).cloned()
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.next_tx_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Held by every write that must reach the backend before it returns.
    /// `None` when writes are not persisted one by one.
    pub(crate) fn persist_guard(&self) -> Option<MutexGuard<'_, ()>> {
        if self.config.durability.is_auto_persist() && self.storage.is_persistent() {
            Some(self.persist_lock.lock())
        } else {
            None
        }
    }

    /// Run `write` against one collection; `write` reports whether it
    /// changed anything.
    ///
    /// When writes are persisted, `write` works on a staged copy that
    /// replaces the live data only after the backend accepted the new
    /// snapshot, so a failed save leaves memory as it was.
    pub(crate) fn write_collection<T>(
        &self,
        name: &str,
        data: &RwLock<CollectionData>,
        write: impl FnOnce(&mut CollectionData) -> Result<(T, bool)>,
    ) -> Result<T> {
        let Some(_persist) = self.persist_guard() else {
            let (out, _) = write(&mut data.write())?;
            return Ok(out);
        };
        let mut live = data.write();
        let mut staged = live.clone();
        let (out, changed) = write(&mut staged)?;
        if changed {
            self.save_staged(&[(name, &staged)])?;
            *live = staged;
        }
        Ok(out)
    }

    /// Whole-store snapshot with `staged` standing in for the collections it
    /// names. Callers may hold the write locks of those collections.
    fn snapshot_with(&self, staged: &[(&str, &CollectionData)]) -> StoreSnapshot {
        let live: Vec<(String, Arc<RwLock<CollectionData>>)> = self
            .collections
            .read()
            .iter()
            .filter(|(name, _)| !staged.iter().any(|(staged_name, _)| *staged_name == name.as_str()))
            .map(|(name, data)| (name.clone(), Arc::clone(data)))
            .collect();

        let mut collections: BTreeMap<String, CollectionSnapshot> = live
            .iter()
            .map(|(name, data)| (name.clone(), data.read().to_snapshot(name)))
            .collect();
        for (name, data) in staged {
            collections.insert(name.to_string(), data.to_snapshot(name));
        }
        StoreSnapshot {
            collections: collections.into_values().collect(),
        }
    }

    /// Save the store with `staged` in place of the live collections it
    /// names. The caller holds the persist guard.
    pub(crate) fn save_staged(&self, staged: &[(&str, &CollectionData)]) -> Result<()> {
        let snapshot = self.snapshot_with(staged);
        self.storage.save(&snapshot)?;
        debug!(
            storage = %self.storage.describe(),
            collections = snapshot.collections.len(),
            "store persisted"
        );
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        self.save_staged(&[])
    }
}

impl LookupSource for DatabaseInner {
    fn snapshot(&self, collection: &str) -> Vec<Value> {
        self.existing_data(collection)
            .map(|data| {
                data.read()
                    .documents()
                    .iter()
                    .map(Document::to_value)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Embedded document database
///
/// Cloning is cheap; all clones share the same collections.
///
/// # Examples
///
/// ```rust
/// use docstore_core::Database;
/// use serde_json::json;
///
/// let db = Database::open_in_memory();
/// let students = db.collection("students");
/// students.insert_one(json!({"name": "Alice"})).unwrap();
/// assert_eq!(students.count_documents(&json!({})).unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("storage", &self.inner.storage.describe())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Database {
    /// Fresh in-memory database with the default configuration
    pub fn open_in_memory() -> Self {
        let inner = DatabaseInner {
            storage: Arc::new(MemoryStorage::new()),
            config: StoreConfig::default(),
            collections: RwLock::new(BTreeMap::new()),
            next_tx_id: AtomicU64::new(1),
            persist_lock: Mutex::new(()),
        };
        Database {
            inner: Arc::new(inner),
        }
    }

    /// Open or create a database backed by a JSON snapshot file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let storage = FileStorage::open(path)?;
        Self::with_storage(Arc::new(storage), config)
    }

    /// Open over any backend, loading whatever it holds
    pub fn with_storage(storage: Arc<dyn Storage>, config: StoreConfig) -> Result<Self> {
        let snapshot = storage.load()?;
        let mut collections = BTreeMap::new();
        for collection in snapshot.collections {
            let name = collection.name.clone();
            let data = CollectionData::from_snapshot(collection)?;
            collections.insert(name, Arc::new(RwLock::new(data)));
        }
        info!(
            storage = %storage.describe(),
            collections = collections.len(),
            "database opened"
        );
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                storage,
                config,
                collections: RwLock::new(collections),
                next_tx_id: AtomicU64::new(1),
                persist_lock: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Handle to `name`; the collection is created on first use
    pub fn collection(&self, name: &str) -> Collection {
        let data = self.inner.collection_data(name);
        Collection::new(name.to_string(), data, Arc::clone(&self.inner))
    }

    /// Create a collection explicitly, optionally binding a validator
    pub fn create_collection(&self, name: &str, options: CreateCollectionOptions) -> Result<Collection> {
        if name.is_empty() {
            return Err(DocStoreError::InvalidQuery(
                "collection name must not be empty".to_string(),
            ));
        }
        let schema = options
            .validator
            .as_ref()
            .map(CompiledSchema::from_value)
            .transpose()?;

        let persist = self.inner.persist_guard();
        if self.inner.collections.read().contains_key(name) {
            return Err(DocStoreError::CollectionExists(name.to_string()));
        }
        let mut data = CollectionData::new();
        data.set_schema(schema);
        if persist.is_some() {
            self.inner.save_staged(&[(name, &data)])?;
        }

        let data = {
            let mut collections = self.inner.collections.write();
            if collections.contains_key(name) {
                return Err(DocStoreError::CollectionExists(name.to_string()));
            }
            let data = Arc::new(RwLock::new(data));
            collections.insert(name.to_string(), Arc::clone(&data));
            data
        };
        info!(collection = name, "collection created");
        Ok(Collection::new(name.to_string(), data, Arc::clone(&self.inner)))
    }

    /// Collection names in lexicographic order
    pub fn list_collections(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.inner.collections.read().contains_key(name)
    }

    /// Write the current state to the backend now
    pub fn flush(&self) -> Result<()> {
        self.inner.persist()
    }

    /// Whole-store snapshot, as the backend would store it
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot_with(&[])
    }

    pub fn start_session(&self) -> Session {
        Session::new(Arc::clone(&self.inner))
    }
}
