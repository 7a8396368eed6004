// docstore-core/src/collection_core/mod.rs
// Collection handle: CRUD, queries, aggregation, indexes and schema
//
// FILE STRUCTURE:
// ├── Result types (InsertManyResult, UpdateResult)
// ├── Collection
// │   ├── insert_one, insert_many
// │   ├── find, find_one, count_documents, find_with_options
// │   ├── update_one, update_many
// │   ├── aggregate
// │   ├── create_index, list_indexes, drop_index
// │   └── set_schema, schema, validate
// └── FindCursor (lazy iterator over matches)

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregation::Pipeline;
use crate::database::DatabaseInner;
use crate::document::{Document, DocumentId};
use crate::error::Result;
use crate::find_options::{apply_limit_skip, apply_sort, FindOptions, Projection};
use crate::index::{check_declaration, Declared, IndexDeclaration, IndexOptions};
use crate::query::Query;
use crate::update::UpdateSpec;

mod data;
pub mod schema;

pub(crate) use self::data::CollectionData;
use self::schema::CompiledSchema;

/// Result of insert_many operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

/// Result of update_one / update_many. Zero matches is a normal result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Handle to a named collection
///
/// Cheap to clone; every clone sees the same documents. Mutating calls take
/// the collection's write lock, reads take the read lock.
#[derive(Clone)]
pub struct Collection {
    name: String,
    data: Arc<RwLock<CollectionData>>,
    db: Arc<DatabaseInner>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("documents", &self.data.read().len())
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(name: String, data: Arc<RwLock<CollectionData>>, db: Arc<DatabaseInner>) -> Self {
        Collection { name, data, db }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== INSERT ==========

    /// Insert one document, generating `_id` when it is missing
    ///
    /// Fails with `DuplicateKey` when `_id` is taken, `SchemaViolation` when a
    /// bound schema rejects the document and `DuplicateIndexKey` when a
    /// unique index already holds its key. The collection is unchanged on
    /// failure, including a failed save.
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        let strategy = self.db.config().id_generation;
        let document = Document::from_value_or_else(document, || {
            self.data.write().reserve_id(strategy)
        })?;
        self.db.write_collection(&self.name, &self.data, |data| {
            Ok((data.insert(&self.name, document)?, true))
        })
    }

    /// Insert a batch. Either every document is inserted or none is;
    /// duplicates inside the batch count as duplicates.
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        let strategy = self.db.config().id_generation;
        let inserted_ids = self.db.write_collection(&self.name, &self.data, |data| {
            let mut staged = data.clone();
            let mut ids = Vec::with_capacity(documents.len());
            for document in documents {
                let document = Document::from_value_or_else(document, || staged.reserve_id(strategy))?;
                ids.push(staged.insert(&self.name, document)?);
            }
            *data = staged;
            let changed = !ids.is_empty();
            Ok((ids, changed))
        })?;
        info!(collection = %self.name, count = inserted_ids.len(), "batch inserted");
        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    // ========== QUERY ==========

    /// Lazy cursor over matching documents in insertion order, each reduced
    /// by `projection` (`None` returns whole documents)
    pub fn find(&self, filter: &Value, projection: Option<&Value>) -> Result<FindCursor> {
        let query = Query::from_json(filter)?;
        let projection = match projection {
            Some(spec) => Projection::from_json(spec)?,
            None => Projection::identity(),
        };
        Ok(FindCursor {
            data: Arc::clone(&self.data),
            query,
            projection,
            position: 0,
        })
    }

    /// First match in insertion order
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let query = Query::from_json(filter)?;
        let data = self.data.read();
        Ok(data
            .next_match(&query, 0)
            .and_then(|(position, _)| data.get(position))
            .map(Document::to_value))
    }

    pub fn count_documents(&self, filter: &Value) -> Result<usize> {
        let query = Query::from_json(filter)?;
        Ok(self.data.read().matching(&query).count())
    }

    /// Find with sort, skip and limit. Sorting sees whole documents; the
    /// projection is applied last.
    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let query = Query::from_json(filter)?;
        let projection = match &options.projection {
            Some(spec) => Projection::from_json(spec)?,
            None => Projection::identity(),
        };

        let mut docs: Vec<Value> = {
            let data = self.data.read();
            data.matching(&query).map(Document::to_value).collect()
        };
        if let Some(sort) = &options.sort {
            apply_sort(&mut docs, sort);
        }
        let docs = apply_limit_skip(docs, options.limit, options.skip);

        Ok(docs
            .into_iter()
            .map(|doc| match doc {
                Value::Object(fields) if !projection.is_identity() => {
                    Value::Object(projection.apply(&fields))
                }
                other => other,
            })
            .collect())
    }

    /// Every document in insertion order
    pub fn snapshot(&self) -> Vec<Value> {
        self.data
            .read()
            .documents()
            .iter()
            .map(Document::to_value)
            .collect()
    }

    // ========== UPDATE ==========

    /// Update the first document matching `filter`. `$` in an update path
    /// resolves to the array element the filter matched.
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, false)
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, true)
    }

    fn update(&self, filter: &Value, update: &Value, multi: bool) -> Result<UpdateResult> {
        let query = Query::from_json(filter)?;
        let spec = UpdateSpec::from_json(update)?;
        self.db.write_collection(&self.name, &self.data, |data| {
            let result = data.update(&self.name, &query, &spec, multi)?;
            Ok((result, result.modified_count > 0))
        })
    }

    // ========== AGGREGATION ==========

    /// Run a pipeline over this collection. `$lookup` stages read their
    /// foreign collections after this collection's snapshot is taken.
    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        let docs = self.snapshot();
        debug!(
            collection = %self.name,
            stages = pipeline.stages().len(),
            input = docs.len(),
            "running aggregation"
        );
        pipeline.execute(docs, self.db.as_ref())
    }

    // ========== INDEXES ==========

    /// Record an index declaration and return its name
    ///
    /// Declaring the same keys and options again is a no-op. A unique index
    /// cannot be declared over documents that already repeat its key.
    pub fn create_index(&self, keys: &Value, options: IndexOptions) -> Result<String> {
        let declaration = IndexDeclaration::from_keys(keys, &options)?;
        let name = declaration.name.clone();
        let declared = self.db.write_collection(&self.name, &self.data, |data| {
            if declaration.unique && data.indexes().get(&name).is_none() {
                let documents = data.documents();
                for (position, document) in documents.iter().enumerate() {
                    check_declaration(
                        &self.name,
                        &declaration,
                        &documents[..position],
                        &document.to_value(),
                    )?;
                }
            }
            let declared = data.indexes_mut().declare(declaration)?;
            Ok((declared, declared == Declared::Created))
        })?;
        if declared == Declared::Created {
            info!(collection = %self.name, index = %name, "index created");
        }
        Ok(name)
    }

    /// `{name, key, unique}` for every declared index
    pub fn list_indexes(&self) -> Vec<Value> {
        self.data
            .read()
            .indexes()
            .declarations()
            .iter()
            .map(IndexDeclaration::to_json)
            .collect()
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.db.write_collection(&self.name, &self.data, |data| {
            data.indexes_mut().drop(name)?;
            Ok(((), true))
        })?;
        info!(collection = %self.name, index = %name, "index dropped");
        Ok(())
    }

    // ========== SCHEMA ==========

    /// Bind a `$jsonSchema`-style validator. Checked on later inserts only;
    /// documents already stored are not re-validated.
    pub fn set_schema(&self, schema: &Value) -> Result<()> {
        let compiled = CompiledSchema::from_value(schema)?;
        self.db.write_collection(&self.name, &self.data, |data| {
            data.set_schema(Some(compiled));
            Ok(((), true))
        })?;
        info!(collection = %self.name, "schema bound");
        Ok(())
    }

    pub fn clear_schema(&self) -> Result<()> {
        self.db.write_collection(&self.name, &self.data, |data| {
            data.set_schema(None);
            Ok(((), true))
        })
    }

    /// The bound schema as it was given
    pub fn schema(&self) -> Option<Value> {
        self.data.read().schema().map(|schema| schema.source().clone())
    }

    /// Violations `document` would raise on insert; empty when it conforms
    /// or no schema is bound
    pub fn validate(&self, document: &Value) -> Vec<String> {
        self.data
            .read()
            .schema()
            .map(|schema| schema.validate(document))
            .unwrap_or_default()
    }
}

/// Lazy cursor returned by `Collection::find`
///
/// Holds the compiled filter and projection and walks the collection one
/// match per `next`, taking the read lock only for the duration of each step.
pub struct FindCursor {
    data: Arc<RwLock<CollectionData>>,
    query: Query,
    projection: Projection,
    position: usize,
}

impl Iterator for FindCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let data = self.data.read();
        let (position, _) = data.next_match(&self.query, self.position)?;
        self.position = position + 1;
        let document = data.get(position)?;
        Some(Value::Object(self.projection.apply(document.fields())))
    }
}

impl fmt::Debug for FindCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindCursor")
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::document::DocumentId;
    use crate::error::DocStoreError;
    use crate::index::IndexOptions;
    use serde_json::json;

    #[test]
    fn test_find_cursor_is_lazy_and_fresh() {
        let db = Database::open_in_memory();
        let people = db.collection("people");
        people.insert_one(json!({"name": "a"})).unwrap();

        let mut cursor = people.find(&json!({}), None).unwrap();
        people.insert_one(json!({"name": "b"})).unwrap();
        assert_eq!(cursor.next().unwrap()["name"], json!("a"));
        assert_eq!(cursor.next().unwrap()["name"], json!("b"));
        assert!(cursor.next().is_none());

        assert_eq!(people.find(&json!({}), None).unwrap().count(), 2);
    }

    #[test]
    fn test_generated_ids() {
        let db = Database::open_in_memory();
        let c = db.collection("c");
        c.insert_one(json!({"_id": 1})).unwrap();
        let id = c.insert_one(json!({"x": 1})).unwrap();
        assert_eq!(id, DocumentId::Int(2));
        let first = c.find_one(&json!({"x": 1})).unwrap().unwrap();
        let keys: Vec<&String> = first.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["_id", "x"]);
    }

    #[test]
    fn test_unique_index_over_existing_duplicates() {
        let db = Database::open_in_memory();
        let c = db.collection("c");
        c.insert_many(vec![json!({"k": 1}), json!({"k": 1})]).unwrap();
        let err = c
            .create_index(&json!({"k": 1}), IndexOptions::new().with_unique(true))
            .unwrap_err();
        assert!(matches!(err, DocStoreError::DuplicateIndexKey { .. }));
        assert!(c.list_indexes().is_empty());
    }

    #[test]
    fn test_validate_without_schema() {
        let db = Database::open_in_memory();
        assert!(db.collection("c").validate(&json!({"a": 1})).is_empty());
    }
}
