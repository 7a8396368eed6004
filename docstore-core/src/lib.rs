// docstore-core/src/lib.rs
// Embedded document store: collections of JSON documents with MongoDB-style
// filters, updates, aggregation, sessions and schema validation

pub mod aggregation;
pub mod collection_core;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod path;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod update;
pub mod value_utils;

// Public exports
pub use aggregation::{LookupSource, Pipeline};
pub use collection_core::{Collection, FindCursor, InsertManyResult, UpdateResult};
pub use config::{Durability, IdGeneration, StoreConfig};
pub use database::{CreateCollectionOptions, Database};
pub use document::{Document, DocumentId, ID_FIELD};
pub use error::{DocStoreError, Result};
pub use find_options::{FindOptions, Projection};
pub use index::{IndexDeclaration, IndexDirection, IndexOptions};
pub use logging::{init_logging, LogLevel};
pub use path::FieldPath;
pub use query::{matches_filter, MatchOutcome, Query};
pub use storage::{FileStorage, MemoryStorage, Storage, StoreSnapshot};
pub use transaction::{
    CommitOutcome, Operation, Session, SessionCollection, TransactionId, TransactionState,
    WriteOutcome,
};
pub use update::{apply_update, UpdateSpec};
