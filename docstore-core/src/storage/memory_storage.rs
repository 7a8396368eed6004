// docstore-core/src/storage/memory_storage.rs
//! Pure in-memory storage backend
//!
//! Nothing survives the process. The last saved snapshot is kept so that a
//! second `Database` over the same `Arc<MemoryStorage>` can load it.

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StoreSnapshot};

/// In-memory storage backend
///
/// # Examples
///
/// ```rust
/// use docstore_core::storage::{MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new();
/// assert!(storage.load().unwrap().collections.is_empty());
/// assert!(!storage.is_persistent());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    saved: Mutex<StoreSnapshot>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        MemoryStorage {
            saved: Mutex::new(snapshot),
        }
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<StoreSnapshot> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        *self.saved.lock() = snapshot.clone();
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CollectionSnapshot;

    #[test]
    fn test_save_then_load() {
        let storage = MemoryStorage::new();
        let snapshot = StoreSnapshot {
            collections: vec![CollectionSnapshot::empty("students")],
        };
        storage.save(&snapshot).unwrap();
        assert_eq!(storage.load().unwrap(), snapshot);
    }

    #[test]
    fn test_with_snapshot() {
        let snapshot = StoreSnapshot {
            collections: vec![CollectionSnapshot::empty("courses")],
        };
        let storage = MemoryStorage::with_snapshot(snapshot.clone());
        assert_eq!(storage.load().unwrap(), snapshot);
        assert_eq!(storage.describe(), "memory");
    }
}
