//! Integration tests for sessions and multi-collection transactions

use docstore_core::{
    CreateCollectionOptions, Database, DocStoreError, DocumentId, TransactionState, WriteOutcome,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;

fn setup() -> Database {
    let db = Database::open_in_memory();
    db.collection("accounts")
        .insert_many(vec![
            json!({"_id": "alice", "balance": 100}),
            json!({"_id": "bob", "balance": 50}),
        ])
        .unwrap();
    db
}

#[test]
fn test_buffered_writes_invisible_until_commit() {
    let db = setup();
    let session = db.start_session();
    session.start_transaction().unwrap();

    let accounts = session.collection("accounts");
    accounts
        .update_one(&json!({"_id": "alice"}), &json!({"$inc": {"balance": -30}}))
        .unwrap();
    accounts
        .update_one(&json!({"_id": "bob"}), &json!({"$inc": {"balance": 30}}))
        .unwrap();
    session
        .collection("ledger")
        .insert_one(json!({"from": "alice", "to": "bob", "amount": 30}))
        .unwrap();

    let direct = db.collection("accounts");
    assert_eq!(
        direct.find_one(&json!({"_id": "alice"})).unwrap().unwrap()["balance"],
        json!(100)
    );
    assert_eq!(db.collection("ledger").len(), 0);

    let outcome = session.commit_transaction().unwrap();
    assert_eq!(outcome.writes.len(), 3);
    assert_eq!(
        direct.find_one(&json!({"_id": "alice"})).unwrap().unwrap()["balance"],
        json!(70)
    );
    assert_eq!(
        direct.find_one(&json!({"_id": "bob"})).unwrap().unwrap()["balance"],
        json!(80)
    );
    assert_eq!(db.collection("ledger").len(), 1);
}

#[test]
fn test_insert_id_assigned_at_buffer_time() {
    let db = setup();
    let session = db.start_session();
    session.start_transaction().unwrap();
    let ledger = session.collection("ledger");
    let first = ledger.insert_one(json!({"n": 1})).unwrap();
    let second = ledger.insert_one(json!({"n": 2})).unwrap();
    assert_ne!(first, second);

    let outcome = session.commit_transaction().unwrap();
    assert_eq!(
        outcome.writes,
        vec![
            WriteOutcome::Inserted(first.clone()),
            WriteOutcome::Inserted(second)
        ]
    );
    let stored = db
        .collection("ledger")
        .find_one(&json!({"n": 1}))
        .unwrap()
        .unwrap();
    assert_eq!(DocumentId::from_value(&stored["_id"]).unwrap(), first);
}

#[test]
fn test_failed_write_rolls_back_every_collection() {
    let db = setup();
    let before = db.snapshot();

    let session = db.start_session();
    session.start_transaction().unwrap();
    session
        .collection("accounts")
        .update_one(&json!({"_id": "alice"}), &json!({"$inc": {"balance": -10}}))
        .unwrap();
    session
        .collection("ledger")
        .insert_one(json!({"_id": 1, "amount": 10}))
        .unwrap();
    // Fails at commit: bob already exists
    session
        .collection("accounts")
        .insert_one(json!({"_id": "bob", "balance": 0}))
        .unwrap();

    let err = session.commit_transaction().unwrap_err();
    match err {
        DocStoreError::TransactionFailed { cause, .. } => {
            assert!(cause.is_duplicate_key());
        }
        other => panic!("expected TransactionFailed, got {:?}", other),
    }
    assert_eq!(session.transaction_state(), Some(TransactionState::Aborted));

    let after = db.snapshot();
    let accounts = |snapshot: &docstore_core::StoreSnapshot| {
        snapshot
            .collections
            .iter()
            .find(|c| c.name == "accounts")
            .cloned()
    };
    assert_eq!(accounts(&after), accounts(&before));
    assert_eq!(db.collection("ledger").len(), 0);
}

#[test]
fn test_schema_violation_rolls_back_every_collection() {
    let db = setup();
    db.create_collection(
        "ledger",
        CreateCollectionOptions::new().with_validator(json!({"$jsonSchema": {
            "required": ["amount"],
            "properties": {"amount": {"bsonType": "int"}}
        }})),
    )
    .unwrap();
    let before = db.snapshot();

    let session = db.start_session();
    session.start_transaction().unwrap();
    session
        .collection("accounts")
        .update_one(&json!({"_id": "alice"}), &json!({"$inc": {"balance": -10}}))
        .unwrap();
    session
        .collection("ledger")
        .insert_one(json!({"_id": 1, "amount": 10}))
        .unwrap();
    // Buffering does not validate; commit does
    session
        .collection("ledger")
        .insert_one(json!({"_id": 2, "amount": "ten"}))
        .unwrap();

    match session.commit_transaction().unwrap_err() {
        DocStoreError::TransactionFailed { cause, .. } => {
            assert!(matches!(*cause, DocStoreError::SchemaViolation { .. }));
        }
        other => panic!("expected TransactionFailed, got {:?}", other),
    }
    assert_eq!(session.transaction_state(), Some(TransactionState::Aborted));
    assert_eq!(db.snapshot(), before);
}

#[test]
fn test_failed_positional_update_aborts_commit() {
    let db = setup();
    let session = db.start_session();
    session.start_transaction().unwrap();
    session
        .collection("accounts")
        .update_one(&json!({"_id": "alice"}), &json!({"$set": {"history.$.x": 1}}))
        .unwrap();
    let err = session.commit_transaction().unwrap_err();
    assert!(matches!(
        err,
        DocStoreError::TransactionFailed { ref cause, .. }
            if matches!(**cause, DocStoreError::InvalidPath { .. })
    ));
}

#[test]
fn test_update_matching_nothing_commits_with_zero_counts() {
    let db = setup();
    let session = db.start_session();
    session.start_transaction().unwrap();
    session
        .collection("accounts")
        .update_one(&json!({"_id": "carol"}), &json!({"$set": {"balance": 1}}))
        .unwrap();
    let outcome = session.commit_transaction().unwrap();
    assert!(matches!(
        &outcome.writes[0],
        WriteOutcome::Updated(result) if result.matched_count == 0 && result.modified_count == 0
    ));
}

#[test]
fn test_commit_sees_writes_issued_earlier_in_same_transaction() {
    let db = setup();
    let session = db.start_session();
    session.start_transaction().unwrap();
    let accounts = session.collection("accounts");
    accounts
        .insert_one(json!({"_id": "carol", "balance": 5}))
        .unwrap();
    accounts
        .update_one(&json!({"_id": "carol"}), &json!({"$inc": {"balance": 5}}))
        .unwrap();
    session.commit_transaction().unwrap();
    assert_eq!(
        db.collection("accounts")
            .find_one(&json!({"_id": "carol"}))
            .unwrap()
            .unwrap()["balance"],
        json!(10)
    );
}

#[test]
fn test_concurrent_sessions_do_not_deadlock() {
    const NUM_THREADS: usize = 8;
    let db = Arc::new(setup());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let session = db.start_session();
                session.start_transaction().unwrap();
                // Alternate the order the collections are touched in
                let (first, second) = if i % 2 == 0 {
                    ("accounts", "ledger")
                } else {
                    ("ledger", "accounts")
                };
                session
                    .collection(first)
                    .update_many(&json!({}), &json!({"$inc": {"touched": 1}}))
                    .unwrap();
                session
                    .collection(second)
                    .insert_one(json!({"thread": i}))
                    .unwrap();
                session.commit_transaction().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total_inserted = db.collection("ledger").count_documents(&json!({"thread": {"$exists": true}})).unwrap()
        + db.collection("accounts").count_documents(&json!({"thread": {"$exists": true}})).unwrap();
    assert_eq!(total_inserted, NUM_THREADS);
}
