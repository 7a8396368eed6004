// docstore-core/src/update.rs
//! Update operators: `$set`, `$unset`, `$inc`
//!
//! An update document is compiled once into an `UpdateSpec`, then applied to
//! each matched document together with the positional index the query
//! matcher reported for it.

use serde_json::{Map, Value};

use crate::document::{Document, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::path::{segment_index, FieldPath, PathSegment};
use crate::value_utils::{as_numeric, Numeric};

#[derive(Debug, Clone)]
enum UpdateOp {
    Set(FieldPath, Value),
    Unset(FieldPath),
    Inc(FieldPath, Value),
}

/// Compiled update document
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    /// Compile `{"$set": {...}, "$inc": {...}, ...}`
    ///
    /// Fails with `InvalidQuery` when the document has no operators, mixes in
    /// plain fields, or names an unsupported operator.
    pub fn from_json(update: &Value) -> Result<Self> {
        let Value::Object(map) = update else {
            return Err(DocStoreError::InvalidQuery(format!(
                "update must be an object, got {}",
                update
            )));
        };
        if map.is_empty() {
            return Err(DocStoreError::InvalidQuery(
                "update document contains no operators".to_string(),
            ));
        }

        let mut ops = Vec::new();
        for (op, fields) in map {
            if !op.starts_with('$') {
                return Err(DocStoreError::InvalidQuery(format!(
                    "update documents must only contain operators, found field '{}'",
                    op
                )));
            }
            let Value::Object(fields) = fields else {
                return Err(DocStoreError::InvalidQuery(format!(
                    "{} requires an object of field paths",
                    op
                )));
            };

            for (field, value) in fields {
                let path = FieldPath::parse(field)?;
                let compiled = match op.as_str() {
                    "$set" => UpdateOp::Set(path, value.clone()),
                    "$unset" => UpdateOp::Unset(path),
                    "$inc" => {
                        if as_numeric(value).is_none() {
                            return Err(DocStoreError::InvalidQuery(format!(
                                "$inc value for '{}' must be numeric",
                                field
                            )));
                        }
                        UpdateOp::Inc(path, value.clone())
                    }
                    other => {
                        return Err(DocStoreError::InvalidQuery(format!(
                            "unsupported update operator '{}'",
                            other
                        )))
                    }
                };
                ops.push(compiled);
            }
        }

        Ok(UpdateSpec { ops })
    }

    /// True if any target path contains `$`
    pub fn uses_positional(&self) -> bool {
        self.ops.iter().any(|op| match op {
            UpdateOp::Set(path, _) | UpdateOp::Unset(path) | UpdateOp::Inc(path, _) => {
                path.has_positional()
            }
        })
    }

    /// Apply to `document`. Either every operator succeeds or the document
    /// is left untouched. Returns whether anything changed.
    pub fn apply(&self, document: &mut Document, positional: Option<usize>) -> Result<bool> {
        let mut root = Value::Object(document.fields().clone());
        let mut modified = false;

        for op in &self.ops {
            modified |= match op {
                UpdateOp::Set(path, value) => {
                    let parts = resolve_path(path, positional)?;
                    set_in(&mut root, &parts, value.clone(), path)?
                }
                UpdateOp::Unset(path) => {
                    let parts = resolve_path(path, positional)?;
                    unset_in(&mut root, &parts)
                }
                UpdateOp::Inc(path, amount) => {
                    let parts = resolve_path(path, positional)?;
                    let next = incremented(get_in(&root, &parts), amount, path)?;
                    set_in(&mut root, &parts, next, path)?
                }
            };
        }

        let Value::Object(fields) = root else {
            return Err(DocStoreError::InvalidDocument(
                "update replaced the document root".to_string(),
            ));
        };
        if fields.get(ID_FIELD) != Some(&document.id().to_value()) {
            return Err(DocStoreError::InvalidPath {
                path: ID_FIELD.to_string(),
                reason: "the _id field cannot be modified".to_string(),
            });
        }

        if modified {
            *document.fields_mut() = fields;
        }
        Ok(modified)
    }
}

/// Convenience wrapper: compile and apply in one go
pub fn apply_update(document: &mut Document, update: &Value, positional: Option<usize>) -> Result<bool> {
    UpdateSpec::from_json(update)?.apply(document, positional)
}

fn resolve_path(path: &FieldPath, positional: Option<usize>) -> Result<Vec<String>> {
    path.segments()
        .iter()
        .map(|segment| match segment {
            PathSegment::Field(name) => Ok(name.clone()),
            PathSegment::Positional => positional.map(|i| i.to_string()).ok_or_else(|| {
                DocStoreError::InvalidPath {
                    path: path.to_string(),
                    reason: "the positional operator did not find the match needed from the query"
                        .to_string(),
                }
            }),
        })
        .collect()
}

fn invalid(path: &FieldPath, reason: String) -> DocStoreError {
    DocStoreError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}

fn set_in(target: &mut Value, parts: &[String], value: Value, path: &FieldPath) -> Result<bool> {
    let Some((head, rest)) = parts.split_first() else {
        return Ok(false);
    };

    match target {
        Value::Object(map) => {
            if rest.is_empty() {
                let changed = map.get(head) != Some(&value);
                map.insert(head.clone(), value);
                return Ok(changed);
            }
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_in(child, rest, value, path)
        }
        Value::Array(arr) => {
            let index = segment_index(head).ok_or_else(|| {
                invalid(path, format!("cannot use field name '{}' to index an array", head))
            })?;
            let len = arr.len();
            let slot = arr.get_mut(index).ok_or_else(|| {
                invalid(path, format!("index {} is out of bounds for array of length {}", index, len))
            })?;
            if rest.is_empty() {
                let changed = *slot != value;
                *slot = value;
                return Ok(changed);
            }
            set_in(slot, rest, value, path)
        }
        other => Err(invalid(
            path,
            format!("cannot create field '{}' in scalar value {}", head, other),
        )),
    }
}

/// Missing paths are a no-op; unsetting an array element leaves `null`
fn unset_in(target: &mut Value, parts: &[String]) -> bool {
    let Some((head, rest)) = parts.split_first() else {
        return false;
    };

    match target {
        Value::Object(map) => {
            if rest.is_empty() {
                let existed = map.contains_key(head);
                map.retain(|key, _| key != head);
                return existed;
            }
            map.get_mut(head).map(|child| unset_in(child, rest)).unwrap_or(false)
        }
        Value::Array(arr) => {
            let Some(slot) = segment_index(head).and_then(|i| arr.get_mut(i)) else {
                return false;
            };
            if rest.is_empty() {
                let changed = !slot.is_null();
                *slot = Value::Null;
                return changed;
            }
            unset_in(slot, rest)
        }
        _ => false,
    }
}

fn get_in<'a>(target: &'a Value, parts: &[String]) -> Option<&'a Value> {
    let mut current = target;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(segment_index(part)?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Integers stay integers unless they overflow or meet a float
fn incremented(current: Option<&Value>, amount: &Value, path: &FieldPath) -> Result<Value> {
    let Some(current) = current else {
        return Ok(amount.clone());
    };
    let (Some(lhs), Some(rhs)) = (as_numeric(current), as_numeric(amount)) else {
        return Err(DocStoreError::InvalidQuery(format!(
            "cannot apply $inc to non-numeric field '{}'",
            path
        )));
    };

    let sum = match (lhs, rhs) {
        (Numeric::Int(a), Numeric::Int(b)) => match a.checked_add(b) {
            Some(total) => Value::from(total),
            None => Value::from(a as f64 + b as f64),
        },
        (Numeric::Int(a), Numeric::Float(b)) => Value::from(a as f64 + b),
        (Numeric::Float(a), Numeric::Int(b)) => Value::from(a + b as f64),
        (Numeric::Float(a), Numeric::Float(b)) => Value::from(a + b),
    };
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bob() -> Document {
        Document::from_value(json!({
            "_id": 2,
            "name": "Bob",
            "courses": [
                {"code": "CS101", "grade": "A-"},
                {"code": "PH101", "grade": "B"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_positional_set() {
        let mut doc = bob();
        let modified = apply_update(&mut doc, &json!({"$set": {"courses.$.grade": "A"}}), Some(1)).unwrap();
        assert!(modified);
        assert_eq!(doc.get("courses.1.grade"), Some(&json!("A")));
        assert_eq!(doc.get("courses.0.grade"), Some(&json!("A-")));
    }

    #[test]
    fn test_positional_without_match_fails() {
        let mut doc = bob();
        let before = doc.clone();
        let err = apply_update(&mut doc, &json!({"$set": {"courses.$.grade": "A"}}), None).unwrap_err();
        assert!(matches!(err, DocStoreError::InvalidPath { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = bob();
        apply_update(&mut doc, &json!({"$set": {"address.city": "Szeged"}}), None).unwrap();
        assert_eq!(doc.to_value()["address"], json!({"city": "Szeged"}));
    }

    #[test]
    fn test_set_keeps_field_position() {
        let mut doc = bob();
        apply_update(&mut doc, &json!({"$set": {"name": "Robert"}}), None).unwrap();
        let keys: Vec<&String> = doc.fields().keys().collect();
        assert_eq!(keys, vec!["_id", "name", "courses"]);
    }

    #[test]
    fn test_set_identical_value_is_not_a_modification() {
        let mut doc = bob();
        let modified = apply_update(&mut doc, &json!({"$set": {"name": "Bob"}}), None).unwrap();
        assert!(!modified);
    }

    #[test]
    fn test_set_through_scalar_fails_atomically() {
        let mut doc = bob();
        let before = doc.clone();
        let err = apply_update(
            &mut doc,
            &json!({"$set": {"year": 3, "name.first": "Bob"}}),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DocStoreError::InvalidPath { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_set_out_of_bounds_fails() {
        let mut doc = bob();
        let err = apply_update(&mut doc, &json!({"$set": {"courses.5.grade": "A"}}), None).unwrap_err();
        assert!(matches!(err, DocStoreError::InvalidPath { .. }));
    }

    #[test]
    fn test_changing_id_fails() {
        let mut doc = bob();
        assert!(matches!(
            apply_update(&mut doc, &json!({"$set": {"_id": 99}}), None),
            Err(DocStoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            apply_update(&mut doc, &json!({"$unset": {"_id": ""}}), None),
            Err(DocStoreError::InvalidPath { .. })
        ));
        assert!(!apply_update(&mut doc, &json!({"$set": {"_id": 2}}), None).unwrap());
    }

    #[test]
    fn test_unset() {
        let mut doc = bob();
        assert!(apply_update(&mut doc, &json!({"$unset": {"name": ""}}), None).unwrap());
        assert!(!doc.contains("name"));
        assert!(!apply_update(&mut doc, &json!({"$unset": {"missing.field": ""}}), None).unwrap());
    }

    #[test]
    fn test_inc() {
        let mut doc = Document::from_value(json!({"_id": "CS101", "credits": 4})).unwrap();
        apply_update(&mut doc, &json!({"$inc": {"credits": 1, "enrolled": 3}}), None).unwrap();
        assert_eq!(doc.get("credits"), Some(&json!(5)));
        assert_eq!(doc.get("enrolled"), Some(&json!(3)));

        apply_update(&mut doc, &json!({"$inc": {"credits": 0.5}}), None).unwrap();
        assert_eq!(doc.get("credits"), Some(&json!(5.5)));

        assert!(matches!(
            apply_update(&mut doc, &json!({"$inc": {"_id": 1}}), None),
            Err(DocStoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_invalid_update_documents() {
        assert!(matches!(
            UpdateSpec::from_json(&json!({})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateSpec::from_json(&json!({"name": "x"})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateSpec::from_json(&json!({"$push": {"a": 1}})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateSpec::from_json(&json!({"$inc": {"a": "one"}})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateSpec::from_json(&json!({"$set": {"a..b": 1}})),
            Err(DocStoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_uses_positional() {
        assert!(UpdateSpec::from_json(&json!({"$set": {"a.$.b": 1}})).unwrap().uses_positional());
        assert!(!UpdateSpec::from_json(&json!({"$set": {"a.0.b": 1}})).unwrap().uses_positional());
    }
}
