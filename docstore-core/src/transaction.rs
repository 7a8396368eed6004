// docstore-core/src/transaction.rs
//! Sessions and multi-collection transactions
//!
//! Writes issued through a `SessionCollection` are buffered and stay
//! invisible until `commit_transaction`. Commit locks every touched
//! collection in name order, replays the buffer on staged copies and swaps
//! them in only when every write succeeded and, under `Durability::OnWrite`,
//! the backend saved them.
//!
//! ```text
//! Session ── start_transaction ──► Pending ──┬── commit ──► Committed
//!                                           ├── commit fails ──► Aborted
//!                                           └── abort ──► Aborted
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLockWriteGuard};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collection_core::{CollectionData, UpdateResult};
use crate::database::DatabaseInner;
use crate::document::{Document, DocumentId};
use crate::error::{DocStoreError, Result};
use crate::query::Query;
use crate::update::UpdateSpec;

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Committed,
    Aborted,
}

/// One buffered write
#[derive(Debug, Clone)]
pub enum Operation {
    Insert {
        collection: String,
        document: Document,
    },
    Update {
        collection: String,
        filter: Query,
        update: UpdateSpec,
        multi: bool,
    },
}

impl Operation {
    pub fn collection(&self) -> &str {
        match self {
            Operation::Insert { collection, .. } | Operation::Update { collection, .. } => collection,
        }
    }
}

/// Buffered writes of one transaction, in issue order
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    operations: Vec<Operation>,
}

impl Transaction {
    fn new(id: TransactionId) -> Self {
        Transaction {
            id,
            state: TransactionState::Pending,
            operations: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

/// What one buffered write did at commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted(DocumentId),
    Updated(UpdateResult),
}

/// Result of a successful commit: one outcome per buffered write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub transaction_id: TransactionId,
    pub writes: Vec<WriteOutcome>,
}

#[derive(Debug, Default)]
struct SessionState {
    active: Option<Transaction>,
    /// Id and final state of the last finished transaction
    finished: Option<(TransactionId, TransactionState)>,
}

/// Client session; owns at most one pending transaction at a time
///
/// # Examples
///
/// ```rust
/// use docstore_core::Database;
/// use serde_json::json;
///
/// let db = Database::open_in_memory();
/// let session = db.start_session();
/// session.start_transaction().unwrap();
/// session.collection("students").insert_one(json!({"name": "Charlie"})).unwrap();
/// assert_eq!(db.collection("students").len(), 0);
/// session.commit_transaction().unwrap();
/// assert_eq!(db.collection("students").len(), 1);
/// ```
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    db: Arc<DatabaseInner>,
    state: Arc<Mutex<SessionState>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        Session {
            id: Uuid::new_v4(),
            db,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// State of the pending transaction, else of the last finished one
    pub fn transaction_state(&self) -> Option<TransactionState> {
        let state = self.state.lock();
        match &state.active {
            Some(tx) => Some(tx.state),
            None => state.finished.map(|(_, finished)| finished),
        }
    }

    /// Open a transaction on this session
    pub fn start_transaction(&self) -> Result<TransactionId> {
        let mut state = self.state.lock();
        if let Some(tx) = &state.active {
            return Err(DocStoreError::TransactionAlreadyActive(tx.id));
        }
        let id = self.db.next_transaction_id();
        state.active = Some(Transaction::new(id));
        debug!(session = %self.id, transaction = id, "transaction started");
        Ok(id)
    }

    /// Collection handle whose writes go to this session's transaction
    pub fn collection(&self, name: &str) -> SessionCollection {
        SessionCollection {
            name: name.to_string(),
            session: self.clone(),
        }
    }

    /// Apply every buffered write, or none of them
    ///
    /// On failure the transaction ends `Aborted` and the error is
    /// `TransactionFailed` carrying the first write error, or the storage
    /// error when the committed state could not be saved.
    pub fn commit_transaction(&self) -> Result<CommitOutcome> {
        let tx = self
            .state
            .lock()
            .active
            .take()
            .ok_or(DocStoreError::NoActiveTransaction)?;
        let id = tx.id;

        match self.apply(&tx) {
            Ok(writes) => {
                self.finish(id, TransactionState::Committed);
                info!(transaction = id, writes = writes.len(), "transaction committed");
                Ok(CommitOutcome {
                    transaction_id: id,
                    writes,
                })
            }
            Err(cause) => {
                self.finish(id, TransactionState::Aborted);
                warn!(transaction = id, error = %cause, "transaction failed, nothing applied");
                Err(DocStoreError::TransactionFailed {
                    id,
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Discard the buffer. A no-op when no transaction is open.
    pub fn abort_transaction(&self) {
        let mut state = self.state.lock();
        if let Some(tx) = state.active.take() {
            debug!(
                transaction = tx.id,
                discarded = tx.operations.len(),
                "transaction aborted"
            );
            state.finished = Some((tx.id, TransactionState::Aborted));
        }
    }

    fn finish(&self, id: TransactionId, final_state: TransactionState) {
        self.state.lock().finished = Some((id, final_state));
    }

    fn buffer(&self, operation: Operation) -> Result<()> {
        let mut state = self.state.lock();
        let tx = state.active.as_mut().ok_or(DocStoreError::NoActiveTransaction)?;
        tx.operations.push(operation);
        Ok(())
    }

    fn apply(&self, tx: &Transaction) -> Result<Vec<WriteOutcome>> {
        let persist = self.db.persist_guard();
        let names: Vec<&str> = {
            let mut names: Vec<&str> = tx.operations.iter().map(Operation::collection).collect();
            names.sort_unstable();
            names.dedup();
            names
        };
        let handles: Vec<_> = names
            .iter()
            .map(|name| self.db.collection_data(name))
            .collect();

        // Sorted names give a global lock order
        let mut guards: BTreeMap<&str, RwLockWriteGuard<'_, CollectionData>> = names
            .iter()
            .zip(handles.iter())
            .map(|(name, handle)| (*name, handle.write()))
            .collect();
        let mut staged: BTreeMap<&str, CollectionData> = guards
            .iter()
            .map(|(name, guard)| (*name, (**guard).clone()))
            .collect();

        let mut writes = Vec::with_capacity(tx.operations.len());
        for operation in &tx.operations {
            let name = operation.collection();
            let Some(data) = staged.get_mut(name) else {
                continue;
            };
            let outcome = match operation {
                Operation::Insert { document, .. } => {
                    WriteOutcome::Inserted(data.insert(name, document.clone())?)
                }
                Operation::Update {
                    filter,
                    update,
                    multi,
                    ..
                } => WriteOutcome::Updated(data.update(name, filter, update, *multi)?),
            };
            writes.push(outcome);
        }

        if persist.is_some() && !writes.is_empty() {
            let pending: Vec<(&str, &CollectionData)> =
                staged.iter().map(|(name, data)| (*name, data)).collect();
            self.db.save_staged(&pending)?;
        }

        for (name, guard) in guards.iter_mut() {
            if let Some(data) = staged.remove(name) {
                **guard = data;
            }
        }
        Ok(writes)
    }
}

/// Collection handle bound to a session; writes are buffered
#[derive(Debug, Clone)]
pub struct SessionCollection {
    name: String,
    session: Session,
}

impl SessionCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer an insert. A missing `_id` is assigned now, so the returned
    /// id is the one the document will have after commit.
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        if !self.session.in_transaction() {
            return Err(DocStoreError::NoActiveTransaction);
        }
        let strategy = self.session.db.config().id_generation;
        let document = Document::from_value_or_else(document, || {
            self.session
                .db
                .collection_data(&self.name)
                .write()
                .reserve_id(strategy)
        })?;
        let id = document.id().clone();
        self.session.buffer(Operation::Insert {
            collection: self.name.clone(),
            document,
        })?;
        Ok(id)
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<()> {
        self.buffer_update(filter, update, false)
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<()> {
        self.buffer_update(filter, update, true)
    }

    /// Filter and update are compiled now; malformed ones fail immediately
    fn buffer_update(&self, filter: &Value, update: &Value, multi: bool) -> Result<()> {
        let filter = Query::from_json(filter)?;
        let update = UpdateSpec::from_json(update)?;
        self.session.buffer(Operation::Update {
            collection: self.name.clone(),
            filter,
            update,
            multi,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::error::DocStoreError;
    use crate::transaction::{TransactionState, WriteOutcome};
    use serde_json::json;

    #[test]
    fn test_start_twice() {
        let db = Database::open_in_memory();
        let session = db.start_session();
        let id = session.start_transaction().unwrap();
        assert!(matches!(
            session.start_transaction(),
            Err(DocStoreError::TransactionAlreadyActive(active)) if active == id
        ));
    }

    #[test]
    fn test_write_without_transaction() {
        let db = Database::open_in_memory();
        let session = db.start_session();
        let students = session.collection("students");
        assert!(matches!(
            students.insert_one(json!({"name": "x"})),
            Err(DocStoreError::NoActiveTransaction)
        ));
        assert!(matches!(
            students.update_one(&json!({}), &json!({"$set": {"a": 1}})),
            Err(DocStoreError::NoActiveTransaction)
        ));
        assert!(matches!(
            session.commit_transaction(),
            Err(DocStoreError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_abort_discards_and_never_fails() {
        let db = Database::open_in_memory();
        let session = db.start_session();
        session.abort_transaction();
        assert_eq!(session.transaction_state(), None);

        session.start_transaction().unwrap();
        session.collection("c").insert_one(json!({"_id": 1})).unwrap();
        session.abort_transaction();
        assert_eq!(session.transaction_state(), Some(TransactionState::Aborted));
        assert!(!session.in_transaction());
        assert_eq!(db.collection("c").len(), 0);
    }

    #[test]
    fn test_commit_outcomes_in_issue_order() {
        let db = Database::open_in_memory();
        db.collection("b").insert_one(json!({"_id": 1, "n": 0})).unwrap();

        let session = db.start_session();
        session.start_transaction().unwrap();
        session.collection("b").update_one(&json!({"_id": 1}), &json!({"$inc": {"n": 1}})).unwrap();
        session.collection("a").insert_one(json!({"_id": "x"})).unwrap();

        let outcome = session.commit_transaction().unwrap();
        assert_eq!(outcome.writes.len(), 2);
        assert!(matches!(&outcome.writes[0], WriteOutcome::Updated(r) if r.modified_count == 1));
        assert!(matches!(&outcome.writes[1], WriteOutcome::Inserted(_)));
        assert_eq!(session.transaction_state(), Some(TransactionState::Committed));
    }

    #[test]
    fn test_malformed_update_rejected_at_buffer_time() {
        let db = Database::open_in_memory();
        let session = db.start_session();
        session.start_transaction().unwrap();
        assert!(matches!(
            session.collection("c").update_one(&json!({}), &json!({"a": 1})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(session.in_transaction());
    }
}
