// docstore-core/src/value_utils.rs
//! Value utility functions shared across modules
//!
//! Nested field access, array fan-out along a path, and value comparison.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::path::segment_index;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// Does not fan out over arrays; see `collect_path_values` for that.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        value = match value {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(segment_index(part)?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Every value reachable through `path`, fanning out over arrays
///
/// `"courses.code"` on `{"courses": [{"code": "A"}, {"code": "B"}]}` yields `A` and `B`.
/// Numeric segments index arrays directly.
pub fn collect_path_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_into(doc, &parts, &mut out);
    out
}

fn collect_into<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(current);
        return;
    };

    match current {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect_into(next, rest, out);
            }
        }
        Value::Array(arr) => {
            if let Some(index) = segment_index(head) {
                if let Some(next) = arr.get(index) {
                    collect_into(next, rest, out);
                }
            } else {
                for elem in arr {
                    collect_into(elem, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Set a value at a nested path, creating intermediate objects as needed
///
/// Used by `$unwind` to put the unwound element back into the document.
/// Stops silently at a non-object intermediate value.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::set_nested_value;
///
/// let mut doc = json!({"name": "Alice"});
/// set_nested_value(&mut doc, "address.city", json!("NYC"));
/// assert_eq!(doc["address"]["city"], "NYC");
/// ```
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;

    for (i, part) in parts.iter().enumerate() {
        let Value::Object(map) = current else {
            return;
        };
        if i == parts.len() - 1 {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Equality with numeric normalisation: `3` equals `3.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
                return i1 == i2;
            }
            match (n1.as_f64(), n2.as_f64()) {
                (Some(f1), Some(f2)) => f1 == f2,
                _ => n1 == n2,
            }
        }
        (Value::Array(a1), Value::Array(a2)) => {
            a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(m1), Value::Object(m2)) => {
            m1.len() == m2.len()
                && m1
                    .iter()
                    .zip(m2)
                    .all(|((k1, v1), (k2, v2))| k1 == k2 && values_equal(v1, v2))
        }
        _ => a == b,
    }
}

/// Compare two JSON values of the same kind
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings, booleans),
/// `None` for incompatible types (e.g., comparing string to number).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
                return Some(i1.cmp(&i2));
            }
            n1.as_f64()?.partial_cmp(&n2.as_f64()?)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Rank of a value's type in sort order: null < numbers < strings < objects < arrays < booleans
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over optional values, used for sorting
///
/// Missing sorts before everything; values of different types order by type rank.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values_with_none;
///
/// assert_eq!(compare_values_with_none(None, Some(&json!(5))), Ordering::Less);
/// assert_eq!(compare_values_with_none(Some(&json!("a")), Some(&json!(1))), Ordering::Greater);
/// ```
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv)
            .unwrap_or_else(|| type_rank(av).cmp(&type_rank(bv))),
    }
}

/// Numeric view of a value for accumulators: integers stay exact
pub(crate) enum Numeric {
    Int(i64),
    Float(f64),
}

pub(crate) fn as_numeric(value: &Value) -> Option<Numeric> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        Some(Numeric::Int(i))
    } else {
        n.as_f64().map(Numeric::Float)
    }
}
