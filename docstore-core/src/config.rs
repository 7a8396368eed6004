// docstore-core/src/config.rs
//! Store configuration
//!
//! How documents get identifiers when the caller leaves `_id` out, and when a
//! file-backed store writes its snapshot.

use serde::{Deserialize, Serialize};

/// Identifier strategy for documents inserted without `_id`
///
/// # Examples
///
/// ```rust
/// use docstore_core::config::{IdGeneration, StoreConfig};
///
/// let config = StoreConfig::new().with_id_generation(IdGeneration::Uuid);
/// assert_eq!(config.id_generation, IdGeneration::Uuid);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGeneration {
    /// 1, 2, 3, ... per collection, skipping ids already taken
    #[default]
    AutoIncrement,
    /// Random UUID v4 string
    Uuid,
}

/// When a file-backed store persists its snapshot
///
/// Has no effect on an in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Save the snapshot as part of every mutating call (insert, update,
    /// index and schema changes, commit). A call whose save fails returns
    /// the storage error and leaves memory unchanged.
    #[default]
    OnWrite,
    /// Only write when `Database::flush` is called
    Manual,
}

impl Durability {
    /// Check if this mode persists automatically
    pub fn is_auto_persist(&self) -> bool {
        matches!(self, Durability::OnWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub id_generation: IdGeneration,
    pub durability: Durability,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_generation(mut self, id_generation: IdGeneration) -> Self {
        self.id_generation = id_generation;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}
