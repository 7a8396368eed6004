// docstore-core/src/storage/traits.rs
//! Storage abstraction for docstore
//!
//! A backend loads and saves a whole-store snapshot. The database keeps all
//! documents in memory and hands the backend a fresh snapshot whenever it
//! persists.
//!
//! ```text
//! Storage trait
//!   ├── MemoryStorage (tests, the CLI demo)
//!   └── FileStorage   (single JSON snapshot file)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::Result;
use crate::index::IndexDeclaration;

/// Persisted form of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    /// Highest auto-generated integer id handed out so far
    #[serde(default)]
    pub last_id: u64,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub indexes: Vec<IndexDeclaration>,
    /// Schema exactly as it was bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl CollectionSnapshot {
    pub fn empty(name: &str) -> Self {
        CollectionSnapshot {
            name: name.to_string(),
            last_id: 0,
            documents: Vec::new(),
            indexes: Vec::new(),
            schema: None,
        }
    }
}

/// Persisted form of the whole store: `{"collections": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub collections: Vec<CollectionSnapshot>,
}

/// Core storage abstraction
///
/// # Implementations
///
/// - **FileStorage**: JSON snapshot on disk, replaced atomically on save
/// - **MemoryStorage**: keeps the last saved snapshot in memory
pub trait Storage: Send + Sync {
    /// Read the stored snapshot; an empty store when nothing was saved yet
    fn load(&self) -> Result<StoreSnapshot>;

    /// Replace the stored snapshot
    fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;

    /// Whether saved data outlives the process
    fn is_persistent(&self) -> bool;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}
