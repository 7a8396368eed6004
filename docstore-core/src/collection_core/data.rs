// docstore-core/src/collection_core/data.rs
//! In-memory state of one collection
//!
//! Every write path (direct calls and transaction replay) goes through the
//! methods here, so duplicate-id, schema and unique-index checks live in one
//! place. Callers hold the collection's write lock.

use ahash::AHashMap;
use tracing::debug;

use crate::config::IdGeneration;
use crate::document::{Document, DocumentId};
use crate::error::{DocStoreError, Result};
use crate::index::IndexCatalog;
use crate::query::{MatchOutcome, Query};
use crate::storage::CollectionSnapshot;
use crate::update::UpdateSpec;

use super::schema::CompiledSchema;
use super::UpdateResult;

#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionData {
    /// Insertion order
    documents: Vec<Document>,
    /// `_id` -> index into `documents`
    positions: AHashMap<DocumentId, usize>,
    indexes: IndexCatalog,
    schema: Option<CompiledSchema>,
    last_id: u64,
}

impl CollectionData {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_snapshot(snapshot: CollectionSnapshot) -> Result<Self> {
        let schema = snapshot
            .schema
            .as_ref()
            .map(CompiledSchema::from_value)
            .transpose()?;
        let mut data = CollectionData {
            documents: Vec::with_capacity(snapshot.documents.len()),
            positions: AHashMap::with_capacity(snapshot.documents.len()),
            indexes: IndexCatalog::from_declarations(snapshot.indexes),
            schema,
            last_id: snapshot.last_id,
        };
        for document in snapshot.documents {
            if data.positions.contains_key(document.id()) {
                return Err(DocStoreError::DuplicateKey {
                    collection: snapshot.name,
                    id: document.id().clone(),
                });
            }
            data.push(document);
        }
        Ok(data)
    }

    pub(crate) fn to_snapshot(&self, name: &str) -> CollectionSnapshot {
        CollectionSnapshot {
            name: name.to_string(),
            last_id: self.last_id,
            documents: self.documents.clone(),
            indexes: self.indexes.declarations().to_vec(),
            schema: self.schema.as_ref().map(|schema| schema.source().clone()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn get(&self, position: usize) -> Option<&Document> {
        self.documents.get(position)
    }

    pub(crate) fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub(crate) fn indexes(&self) -> &IndexCatalog {
        &self.indexes
    }

    pub(crate) fn indexes_mut(&mut self) -> &mut IndexCatalog {
        &mut self.indexes
    }

    pub(crate) fn schema(&self) -> Option<&CompiledSchema> {
        self.schema.as_ref()
    }

    pub(crate) fn set_schema(&mut self, schema: Option<CompiledSchema>) {
        self.schema = schema;
    }

    /// Hand out the next identifier. Auto-increment ids skip values already
    /// taken by caller-supplied `_id`s; a reserved id is never reused even if
    /// the insert that asked for it fails. Fails once integer ids run out.
    pub(crate) fn reserve_id(&mut self, strategy: IdGeneration) -> Result<DocumentId> {
        match strategy {
            IdGeneration::Uuid => Ok(DocumentId::new_uuid()),
            IdGeneration::AutoIncrement => loop {
                let candidate = DocumentId::new_auto(self.last_id)?;
                self.last_id += 1;
                if !self.positions.contains_key(&candidate) {
                    break Ok(candidate);
                }
            },
        }
    }

    /// First matching document at or after `start`
    pub(crate) fn next_match(&self, query: &Query, start: usize) -> Option<(usize, MatchOutcome)> {
        self.documents
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(position, doc)| query.match_document(doc).map(|outcome| (position, outcome)))
    }

    pub(crate) fn matching<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents.iter().filter(move |doc| query.matches(doc))
    }

    /// Reject `document` if it would break a collection invariant
    pub(crate) fn check_insert(&self, collection: &str, document: &Document) -> Result<()> {
        if self.positions.contains_key(document.id()) {
            return Err(DocStoreError::DuplicateKey {
                collection: collection.to_string(),
                id: document.id().clone(),
            });
        }
        if let Some(schema) = &self.schema {
            let violations = schema.validate(&document.to_value());
            if !violations.is_empty() {
                return Err(DocStoreError::SchemaViolation {
                    collection: collection.to_string(),
                    violations,
                });
            }
        }
        self.indexes
            .check_unique(collection, self.documents.iter(), document)
    }

    pub(crate) fn insert(&mut self, collection: &str, document: Document) -> Result<DocumentId> {
        self.check_insert(collection, &document)?;
        let id = document.id().clone();
        self.push(document);
        debug!(collection, id = %id, "document inserted");
        Ok(id)
    }

    /// Apply `update` to the first match (or every match when `multi`).
    ///
    /// All-or-nothing: if any matched document fails to update, or the
    /// result would break a unique index, nothing changes.
    pub(crate) fn update(
        &mut self,
        collection: &str,
        query: &Query,
        update: &UpdateSpec,
        multi: bool,
    ) -> Result<UpdateResult> {
        let mut result = UpdateResult::default();
        let mut changed: Vec<(usize, Document)> = Vec::new();
        let mut start = 0;

        while let Some((position, outcome)) = self.next_match(query, start) {
            result.matched_count += 1;
            let mut updated = self.documents[position].clone();
            if update.apply(&mut updated, outcome.positional)? {
                changed.push((position, updated));
            }
            if !multi {
                break;
            }
            start = position + 1;
        }
        result.modified_count = changed.len() as u64;

        if changed.is_empty() {
            return Ok(result);
        }

        if self.indexes.declarations().iter().any(|decl| decl.unique) {
            let mut staged = self.documents.clone();
            for (position, document) in &changed {
                staged[*position] = document.clone();
            }
            for (position, document) in &changed {
                let position = *position;
                let others = staged
                    .iter()
                    .enumerate()
                    .filter(move |(other, _)| *other != position)
                    .map(|(_, doc)| doc);
                self.indexes.check_unique(collection, others, document)?;
            }
        }

        for (position, document) in changed {
            self.documents[position] = document;
        }
        debug!(
            collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "documents updated"
        );
        Ok(result)
    }

    fn push(&mut self, document: Document) {
        if let DocumentId::Int(id) = document.id() {
            if let Ok(id) = u64::try_from(*id) {
                self.last_id = self.last_id.max(id);
            }
        }
        self.positions
            .insert(document.id().clone(), self.documents.len());
        self.documents.push(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDeclaration, IndexOptions};
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_reserve_id_skips_taken_ids() {
        let mut data = CollectionData::new();
        data.insert("c", doc(json!({"_id": 1}))).unwrap();
        data.insert("c", doc(json!({"_id": "x"}))).unwrap();
        assert_eq!(data.reserve_id(IdGeneration::AutoIncrement).unwrap(), DocumentId::Int(2));
        assert_eq!(data.reserve_id(IdGeneration::AutoIncrement).unwrap(), DocumentId::Int(3));
    }

    #[test]
    fn test_reserve_id_after_max_id_fails() {
        let mut data = CollectionData::new();
        data.insert("c", doc(json!({"_id": i64::MAX}))).unwrap();
        assert!(matches!(
            data.reserve_id(IdGeneration::AutoIncrement),
            Err(DocStoreError::InvalidDocument(_))
        ));
        // Uuid ids are unaffected
        assert!(data.reserve_id(IdGeneration::Uuid).is_ok());
    }

    #[test]
    fn test_insert_duplicate_id() {
        let mut data = CollectionData::new();
        data.insert("c", doc(json!({"_id": 1, "a": 1}))).unwrap();
        let err = data.insert("c", doc(json!({"_id": 1, "a": 2}))).unwrap_err();
        assert!(matches!(err, DocStoreError::DuplicateKey { .. }));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_update_unique_violation_changes_nothing() {
        let mut data = CollectionData::new();
        let decl = IndexDeclaration::from_keys(
            &json!({"email": 1}),
            &IndexOptions::new().with_unique(true),
        )
        .unwrap();
        data.indexes_mut().declare(decl).unwrap();
        data.insert("users", doc(json!({"_id": 1, "email": "a@x"}))).unwrap();
        data.insert("users", doc(json!({"_id": 2, "email": "b@x"}))).unwrap();

        let query = Query::from_json(&json!({"_id": 2})).unwrap();
        let update = UpdateSpec::from_json(&json!({"$set": {"email": "a@x"}})).unwrap();
        let err = data.update("users", &query, &update, false).unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(data.get(1).unwrap().get("email"), Some(&json!("b@x")));
    }

    #[test]
    fn test_update_many_is_all_or_nothing() {
        let mut data = CollectionData::new();
        data.insert("c", doc(json!({"_id": 1, "n": 1}))).unwrap();
        data.insert("c", doc(json!({"_id": 2, "n": "text"}))).unwrap();

        let query = Query::new();
        let update = UpdateSpec::from_json(&json!({"$inc": {"n": 1}})).unwrap();
        assert!(data.update("c", &query, &update, true).is_err());
        assert_eq!(data.get(0).unwrap().get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut data = CollectionData::new();
        data.set_schema(Some(
            CompiledSchema::from_value(&json!({"required": ["name"]})).unwrap(),
        ));
        data.insert("c", doc(json!({"_id": 4, "name": "x"}))).unwrap();

        let snapshot = data.to_snapshot("c");
        assert_eq!(snapshot.last_id, 4);
        let restored = CollectionData::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.to_snapshot("c"), snapshot);
        assert!(restored.schema().is_some());
    }
}
