// docstore-core/src/document.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{DocStoreError, Result};

/// Name of the identifier field carried by every stored document
pub const ID_FIELD: &str = "_id";

/// MongoDB-style document
///
/// Invariant: `fields` always holds `_id` as its first entry, equal to `id`.
/// Field order is otherwise the insertion order of the original value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document {
    id: DocumentId,
    fields: Map<String, Value>,
}

/// Document identifier
///
/// Untagged so it serializes as the plain value: `{"_id": 2}` or `{"_id": "CS101"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Next auto-increment id after `last_id`; fails once ids would pass
    /// `i64::MAX`
    pub fn new_auto(last_id: u64) -> Result<Self> {
        last_id
            .checked_add(1)
            .and_then(|next| i64::try_from(next).ok())
            .map(DocumentId::Int)
            .ok_or_else(|| {
                DocStoreError::InvalidDocument(format!(
                    "no auto-increment id left after {}",
                    last_id
                ))
            })
    }

    /// Random UUID v4 string id
    pub fn new_uuid() -> Self {
        DocumentId::String(Uuid::new_v4().to_string())
    }

    /// Parse an `_id` value. Only integers and strings are accepted.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(DocumentId::Int).ok_or_else(|| {
                DocStoreError::InvalidDocument(format!(
                    "_id must be an integer or a string, got {}",
                    n
                ))
            }),
            other => Err(DocStoreError::InvalidDocument(format!(
                "_id must be an integer or a string, got {}",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        DocumentId::Int(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId::String(id.to_string())
    }
}

impl Document {
    /// Build a document from an id and the remaining fields.
    /// Any `_id` already present in `fields` is replaced by `id`.
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        let mut ordered = Map::with_capacity(fields.len() + 1);
        ordered.insert(ID_FIELD.to_string(), id.to_value());
        for (key, value) in fields {
            if key != ID_FIELD {
                ordered.insert(key, value);
            }
        }
        Document {
            id,
            fields: ordered,
        }
    }

    /// Document from a JSON object that already carries `_id`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let id = map
                    .get(ID_FIELD)
                    .ok_or_else(|| DocStoreError::InvalidDocument("missing _id".to_string()))
                    .and_then(DocumentId::from_value)?;
                Ok(Document::new(id, map))
            }
            other => Err(DocStoreError::InvalidDocument(format!(
                "document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Document from a JSON object, generating `_id` with `next_id` when absent
    pub fn from_value_or_else<F>(value: Value, next_id: F) -> Result<Self>
    where
        F: FnOnce() -> Result<DocumentId>,
    {
        match value {
            Value::Object(map) if !map.contains_key(ID_FIELD) => Ok(Document::new(next_id()?, map)),
            other => Document::from_value(other),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Document::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// All fields, `_id` first
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Mutable access for the update applier, which must leave `_id` as is
    pub(crate) fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Field lookup with dot notation ("address.city", "items.0.name").
    /// Does not fan out over arrays; the query matcher handles that.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field.is_empty() {
            return None;
        }
        let mut parts = field.split('.');
        let mut value = self.fields.get(parts.next()?)?;
        for part in parts {
            value = match value {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for Document {
    type Error = DocStoreError;

    fn try_from(value: Value) -> Result<Self> {
        Document::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_document_id_new_auto() {
        assert_eq!(DocumentId::new_auto(0).unwrap(), DocumentId::Int(1));
        assert_eq!(DocumentId::new_auto(10).unwrap(), DocumentId::Int(11));
        assert!(matches!(
            DocumentId::new_auto(i64::MAX as u64),
            Err(DocStoreError::InvalidDocument(_))
        ));
        assert!(DocumentId::new_auto(u64::MAX).is_err());
    }

    #[test]
    fn test_document_id_uuid() {
        match DocumentId::new_uuid() {
            DocumentId::String(s) => {
                assert_eq!(s.len(), 36);
                assert!(s.contains('-'));
            }
            other => panic!("Expected String variant, got {:?}", other),
        }
    }

    #[test]
    fn test_document_id_from_value() {
        assert_eq!(DocumentId::from_value(&json!(3)).unwrap(), DocumentId::Int(3));
        assert_eq!(
            DocumentId::from_value(&json!("CS101")).unwrap(),
            DocumentId::String("CS101".to_string())
        );
        assert!(DocumentId::from_value(&json!(1.5)).is_err());
        assert!(DocumentId::from_value(&json!(null)).is_err());
        assert!(DocumentId::from_value(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_document_id_display() {
        assert_eq!(DocumentId::Int(7).to_string(), "7");
        assert_eq!(DocumentId::from("x").to_string(), "\"x\"");
    }

    #[test]
    fn test_id_is_first_field() {
        let doc = Document::from_value(json!({"name": "Alice", "_id": 1})).unwrap();
        let keys: Vec<&String> = doc.fields().keys().collect();
        assert_eq!(keys, vec!["_id", "name"]);
        assert_eq!(doc.id(), &DocumentId::Int(1));
    }

    #[test]
    fn test_new_replaces_embedded_id() {
        let doc = Document::new(DocumentId::Int(5), object(json!({"_id": 9, "a": 1})));
        assert_eq!(doc.get("_id"), Some(&json!(5)));
        assert_eq!(doc.fields().len(), 2);
        assert_eq!(doc.id(), &DocumentId::Int(5));
    }

    #[test]
    fn test_from_value_or_else_generates_missing_id() {
        let doc = Document::from_value_or_else(json!({"name": "Bob"}), || Ok(DocumentId::Int(42)))
            .unwrap();
        assert_eq!(doc.id(), &DocumentId::Int(42));

        let doc = Document::from_value_or_else(json!({"_id": "k", "name": "Bob"}), || {
            panic!("generator must not run when _id is present")
        })
        .unwrap();
        assert_eq!(doc.id(), &DocumentId::from("k"));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(matches!(
            Document::from_value(json!([1, 2])),
            Err(DocStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            Document::from_value(json!({"name": "no id"})),
            Err(DocStoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_get_nested_dot_path() {
        let doc = Document::from_value(json!({
            "_id": 1,
            "address": {"city": "Budapest", "zip": 1111},
            "courses": [{"code": "CS101"}, {"code": "MA101"}]
        }))
        .unwrap();
        assert_eq!(doc.get("address.city"), Some(&json!("Budapest")));
        assert_eq!(doc.get("courses.1.code"), Some(&json!("MA101")));
        assert_eq!(doc.get("courses.code"), None);
        assert_eq!(doc.get(""), None);
    }

    #[test]
    fn test_json_roundtrip_keeps_order() {
        let doc = Document::from_value(json!({"_id": 2, "b": 1, "a": [1, 2]})).unwrap();
        let json_str = doc.to_json().unwrap();
        assert_eq!(json_str, r#"{"_id":2,"b":1,"a":[1,2]}"#);
        assert_eq!(Document::from_json(&json_str).unwrap(), doc);
    }

    #[test]
    fn test_serde_via_value() {
        let doc: Document = serde_json::from_value(json!({"_id": "x", "n": 1})).unwrap();
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"_id": "x", "n": 1}));
    }
}
