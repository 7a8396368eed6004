//! Property tests for `$unwind` cardinality and `$group` totals

use docstore_core::Database;
use proptest::prelude::*;
use serde_json::{json, Value};

proptest! {
    /// Unwinding an N-element array yields N documents carrying every
    /// sibling field unchanged
    #[test]
    fn unwind_yields_one_document_per_element(
        items in prop::collection::vec(0i64..1000, 0..20),
        label in "[a-z]{1,8}",
    ) {
        let db = Database::open_in_memory();
        let c = db.collection("c");
        c.insert_one(json!({"_id": 1, "label": label.clone(), "items": items.clone()})).unwrap();

        let out = c.aggregate(&json!([{"$unwind": "$items"}])).unwrap();
        prop_assert_eq!(out.len(), items.len());
        for (doc, item) in out.iter().zip(&items) {
            prop_assert_eq!(&doc["_id"], &json!(1));
            prop_assert_eq!(&doc["label"], &Value::from(label.clone()));
            prop_assert_eq!(&doc["items"], &json!(item));
        }
    }

    /// Preserved unwind never drops a document
    #[test]
    fn preserved_unwind_keeps_empty_arrays(lengths in prop::collection::vec(0usize..4, 1..10)) {
        let db = Database::open_in_memory();
        let c = db.collection("c");
        let docs: Vec<Value> = lengths
            .iter()
            .map(|len| json!({"xs": (0..*len).collect::<Vec<_>>()}))
            .collect();
        c.insert_many(docs).unwrap();

        let out = c
            .aggregate(&json!([{"$unwind": {"path": "$xs", "preserveNullAndEmptyArrays": true}}]))
            .unwrap();
        let expected: usize = lengths.iter().map(|len| (*len).max(1)).sum();
        prop_assert_eq!(out.len(), expected);
    }

    /// Summing after an unwind equals summing the arrays directly
    #[test]
    fn group_sum_matches_array_totals(
        groups in prop::collection::vec(prop::collection::vec(-50i64..50, 0..6), 1..6),
    ) {
        let db = Database::open_in_memory();
        let c = db.collection("c");
        for (i, values) in groups.iter().enumerate() {
            c.insert_one(json!({"g": i, "values": values})).unwrap();
        }

        let out = c
            .aggregate(&json!([
                {"$unwind": "$values"},
                {"$group": {"_id": "$g", "total": {"$sum": "$values"}}}
            ]))
            .unwrap();
        let expected: Vec<Value> = groups
            .iter()
            .enumerate()
            .filter(|(_, values)| !values.is_empty())
            .map(|(i, values)| json!({"_id": i, "total": values.iter().sum::<i64>()}))
            .collect();
        prop_assert_eq!(out, expected);
    }
}
