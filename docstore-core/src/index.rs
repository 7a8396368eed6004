// docstore-core/src/index.rs
// Index declarations and unique-key enforcement

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

use crate::document::Document;
use crate::error::{DocStoreError, Result};
use crate::value_utils::get_nested_value;

/// Index key extracted from a document, used to detect unique violations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    String(String),
    /// Arrays and embedded documents, keyed by their canonical JSON text
    Composite(String),
    /// Compound key for multi-field indexes (e.g., ["country", "city"])
    Compound(Vec<IndexKey>),
}

/// f64 wrapper comparing by bit pattern so it can be hashed
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl Hash for OrderedFloat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Convert a field value (None = missing) to an IndexKey.
/// Missing and null share a key; whole floats key like integers.
impl From<Option<&Value>> for IndexKey {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => IndexKey::Null,
            Some(Value::Bool(b)) => IndexKey::Bool(*b),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    IndexKey::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) => match whole_float(f) {
                            Some(i) => IndexKey::Int(i),
                            None => IndexKey::Float(OrderedFloat(f)),
                        },
                        None => IndexKey::Composite(n.to_string()),
                    }
                }
            }
            Some(Value::String(s)) => IndexKey::String(s.clone()),
            Some(other) => IndexKey::Composite(normalize_numbers(other).to_string()),
        }
    }
}

fn whole_float(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Copy of `value` with whole floats turned into integers at any depth
fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.as_i64().is_none() => match n.as_f64().and_then(whole_float) {
            Some(i) => Value::from(i),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, field)| (key.clone(), normalize_numbers(field)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Sort direction of one index key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    pub fn as_i64(&self) -> i64 {
        match self {
            IndexDirection::Ascending => 1,
            IndexDirection::Descending => -1,
        }
    }
}

impl TryFrom<i64> for IndexDirection {
    type Error = DocStoreError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(IndexDirection::Ascending),
            -1 => Ok(IndexDirection::Descending),
            other => Err(DocStoreError::InvalidQuery(format!(
                "index direction must be 1 or -1, got {}",
                other
            ))),
        }
    }
}

impl From<IndexDirection> for i64 {
    fn from(direction: IndexDirection) -> Self {
        direction.as_i64()
    }
}

/// Options for `create_index`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// A recorded index: ordered keys, name and unique flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDeclaration {
    pub name: String,
    pub keys: Vec<(String, IndexDirection)>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDeclaration {
    /// Build from a key document such as `{"name": 1}` or `{"credits": -1}`
    pub fn from_keys(keys: &Value, options: &IndexOptions) -> Result<Self> {
        let Value::Object(map) = keys else {
            return Err(DocStoreError::InvalidQuery(format!(
                "index keys must be an object, got {}",
                keys
            )));
        };
        if map.is_empty() {
            return Err(DocStoreError::InvalidQuery(
                "index requires at least one key".to_string(),
            ));
        }

        let mut parsed = Vec::with_capacity(map.len());
        for (field, direction) in map {
            if field.is_empty() || field.split('.').any(|part| part.is_empty() || part.starts_with('$')) {
                return Err(DocStoreError::InvalidPath {
                    path: field.clone(),
                    reason: "invalid index key".to_string(),
                });
            }
            let direction = direction.as_i64().ok_or_else(|| {
                DocStoreError::InvalidQuery(format!(
                    "index direction for '{}' must be 1 or -1",
                    field
                ))
            })?;
            parsed.push((field.clone(), IndexDirection::try_from(direction)?));
        }

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| default_index_name(&parsed));

        Ok(IndexDeclaration {
            name,
            keys: parsed,
            unique: options.unique,
        })
    }

    /// Key document form, e.g. `{"credits": -1}`
    pub fn keys_json(&self) -> Value {
        Value::Object(
            self.keys
                .iter()
                .map(|(field, direction)| (field.clone(), Value::from(direction.as_i64())))
                .collect(),
        )
    }

    pub fn extract_key(&self, doc: &Value) -> IndexKey {
        if self.keys.len() == 1 {
            return IndexKey::from(get_nested_value(doc, &self.keys[0].0));
        }
        IndexKey::Compound(
            self.keys
                .iter()
                .map(|(field, _)| IndexKey::from(get_nested_value(doc, field)))
                .collect(),
        )
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "key": self.keys_json(),
            "unique": self.unique,
        })
    }
}

/// `name_1`, `credits_-1`, `a_1_b_-1`
pub fn default_index_name(keys: &[(String, IndexDirection)]) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction.as_i64()))
        .collect::<Vec<_>>()
        .join("_")
}

/// Index declarations of one collection
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    declarations: Vec<IndexDeclaration>,
}

/// What `IndexCatalog::declare` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declared {
    Created,
    AlreadyExists,
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_declarations(declarations: Vec<IndexDeclaration>) -> Self {
        IndexCatalog { declarations }
    }

    /// Record `declaration`. The same declaration twice is a no-op; the same
    /// name or keys with different options is an `IndexConflict`.
    pub fn declare(&mut self, declaration: IndexDeclaration) -> Result<Declared> {
        for existing in &self.declarations {
            if *existing == declaration {
                return Ok(Declared::AlreadyExists);
            }
            if existing.name == declaration.name || existing.keys == declaration.keys {
                return Err(DocStoreError::IndexConflict(declaration.name));
            }
        }
        self.declarations.push(declaration);
        Ok(Declared::Created)
    }

    pub fn drop(&mut self, name: &str) -> Result<IndexDeclaration> {
        let position = self
            .declarations
            .iter()
            .position(|decl| decl.name == name)
            .ok_or_else(|| DocStoreError::IndexNotFound(name.to_string()))?;
        Ok(self.declarations.remove(position))
    }

    pub fn get(&self, name: &str) -> Option<&IndexDeclaration> {
        self.declarations.iter().find(|decl| decl.name == name)
    }

    pub fn declarations(&self) -> &[IndexDeclaration] {
        &self.declarations
    }

    pub fn names(&self) -> Vec<String> {
        self.declarations.iter().map(|decl| decl.name.clone()).collect()
    }

    /// Reject `candidate` if any unique index already holds its key among
    /// `others`
    pub fn check_unique<'a, I>(&self, collection: &str, others: I, candidate: &Document) -> Result<()>
    where
        I: IntoIterator<Item = &'a Document> + Clone,
    {
        let candidate_value = candidate.to_value();
        for decl in self.declarations.iter().filter(|decl| decl.unique) {
            check_declaration(collection, decl, others.clone(), &candidate_value)?;
        }
        Ok(())
    }
}

/// Reject when `candidate` duplicates a key already held in `others`
pub fn check_declaration<'a, I>(
    collection: &str,
    decl: &IndexDeclaration,
    others: I,
    candidate: &Value,
) -> Result<()>
where
    I: IntoIterator<Item = &'a Document>,
{
    let key = decl.extract_key(candidate);
    let duplicate = others
        .into_iter()
        .any(|doc| decl.extract_key(&doc.to_value()) == key);
    if duplicate {
        return Err(DocStoreError::DuplicateIndexKey {
            collection: collection.to_string(),
            index: decl.name.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_default_names() {
        let asc = IndexDeclaration::from_keys(&json!({"name": 1}), &IndexOptions::new()).unwrap();
        assert_eq!(asc.name, "name_1");
        let desc = IndexDeclaration::from_keys(&json!({"credits": -1}), &IndexOptions::new()).unwrap();
        assert_eq!(desc.name, "credits_-1");
        let compound =
            IndexDeclaration::from_keys(&json!({"a": 1, "b.c": -1}), &IndexOptions::new()).unwrap();
        assert_eq!(compound.name, "a_1_b.c_-1");
        assert_eq!(compound.keys_json(), json!({"a": 1, "b.c": -1}));
    }

    #[test]
    fn test_invalid_keys() {
        let options = IndexOptions::new();
        assert!(IndexDeclaration::from_keys(&json!({}), &options).is_err());
        assert!(IndexDeclaration::from_keys(&json!({"a": 2}), &options).is_err());
        assert!(IndexDeclaration::from_keys(&json!({"a": "text"}), &options).is_err());
        assert!(IndexDeclaration::from_keys(&json!(["a"]), &options).is_err());
        assert!(IndexDeclaration::from_keys(&json!({"a..b": 1}), &options).is_err());
    }

    #[test]
    fn test_declare_is_idempotent() {
        let mut catalog = IndexCatalog::new();
        let decl = IndexDeclaration::from_keys(&json!({"name": 1}), &IndexOptions::new()).unwrap();
        assert_eq!(catalog.declare(decl.clone()).unwrap(), Declared::Created);
        assert_eq!(catalog.declare(decl).unwrap(), Declared::AlreadyExists);
        assert_eq!(catalog.names(), vec!["name_1"]);
    }

    #[test]
    fn test_declare_conflicts() {
        let mut catalog = IndexCatalog::new();
        let decl = IndexDeclaration::from_keys(&json!({"name": 1}), &IndexOptions::new()).unwrap();
        catalog.declare(decl).unwrap();

        let unique = IndexDeclaration::from_keys(
            &json!({"name": 1}),
            &IndexOptions::new().with_unique(true),
        )
        .unwrap();
        assert!(matches!(
            catalog.declare(unique),
            Err(DocStoreError::IndexConflict(_))
        ));

        let renamed_keys = IndexDeclaration::from_keys(
            &json!({"email": 1}),
            &IndexOptions::new().with_name("name_1"),
        )
        .unwrap();
        assert!(matches!(
            catalog.declare(renamed_keys),
            Err(DocStoreError::IndexConflict(_))
        ));
    }

    #[test]
    fn test_drop() {
        let mut catalog = IndexCatalog::new();
        let decl = IndexDeclaration::from_keys(&json!({"name": 1}), &IndexOptions::new()).unwrap();
        catalog.declare(decl).unwrap();
        assert_eq!(catalog.drop("name_1").unwrap().name, "name_1");
        assert!(matches!(
            catalog.drop("name_1"),
            Err(DocStoreError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_index_key_normalisation() {
        assert_eq!(IndexKey::from(Some(&json!(3))), IndexKey::from(Some(&json!(3.0))));
        assert_eq!(IndexKey::from(None), IndexKey::from(Some(&json!(null))));
        assert_ne!(IndexKey::from(Some(&json!("3"))), IndexKey::from(Some(&json!(3))));
        assert_eq!(
            IndexKey::from(Some(&json!({"a": [1, 2.0]}))),
            IndexKey::from(Some(&json!({"a": [1.0, 2]})))
        );
        assert_ne!(IndexKey::from(Some(&json!([1.5]))), IndexKey::from(Some(&json!([1]))));
        assert_eq!(
            IndexKey::from(Some(&json!({"a": 1}))),
            IndexKey::Composite("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_check_unique() {
        let mut catalog = IndexCatalog::new();
        let decl = IndexDeclaration::from_keys(
            &json!({"email": 1}),
            &IndexOptions::new().with_unique(true),
        )
        .unwrap();
        catalog.declare(decl).unwrap();

        let existing = vec![doc(json!({"_id": 1, "email": "a@x"}))];
        let ok = doc(json!({"_id": 2, "email": "b@x"}));
        let dup = doc(json!({"_id": 3, "email": "a@x"}));

        assert!(catalog.check_unique("users", &existing, &ok).is_ok());
        let err = catalog.check_unique("users", &existing, &dup).unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_declaration_serde() {
        let decl = IndexDeclaration::from_keys(
            &json!({"credits": -1}),
            &IndexOptions::new().with_unique(true),
        )
        .unwrap();
        let value = serde_json::to_value(&decl).unwrap();
        assert_eq!(
            value,
            json!({"name": "credits_-1", "keys": [["credits", -1]], "unique": true})
        );
        let back: IndexDeclaration = serde_json::from_value(value).unwrap();
        assert_eq!(back, decl);
    }
}
