// docstore-core/src/error.rs
//! Error type shared by every docstore operation

use thiserror::Error;

use crate::document::DocumentId;

/// docstore error kinds
///
/// A write that matches no document is not an error: it reports zero
/// matched/modified counts instead.
#[derive(Debug, Error)]
pub enum DocStoreError {
    #[error("duplicate key in collection '{collection}': _id {id}")]
    DuplicateKey { collection: String, id: DocumentId },

    #[error("duplicate key in collection '{collection}' for unique index '{index}'")]
    DuplicateIndexKey { collection: String, index: String },

    #[error("document failed schema validation for collection '{collection}': {}", violations.join("; "))]
    SchemaViolation {
        collection: String,
        violations: Vec<String>,
    },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("transaction {id} failed: {cause}")]
    TransactionFailed {
        id: u64,
        #[source]
        cause: Box<DocStoreError>,
    },

    #[error("transaction {0} is already active on this session")]
    TransactionAlreadyActive(u64),

    #[error("no transaction is active on this session")]
    NoActiveTransaction,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("aggregation error: {0}")]
    AggregationError(String),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("index '{0}' already exists with different keys or options")]
    IndexConflict(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocStoreError {
    /// Same as `DuplicateKey` or `DuplicateIndexKey`
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            DocStoreError::DuplicateKey { .. } | DocStoreError::DuplicateIndexKey { .. }
        )
    }
}

impl From<serde_json::Error> for DocStoreError {
    fn from(err: serde_json::Error) -> Self {
        DocStoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocStoreError>;
