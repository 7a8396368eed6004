// docstore-core/src/storage/mod.rs
mod file_storage;
mod memory_storage;
mod traits;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use traits::{CollectionSnapshot, Storage, StoreSnapshot};
