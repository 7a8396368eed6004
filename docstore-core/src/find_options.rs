// docstore-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use serde_json::{Map, Value};

use crate::document::ID_FIELD;
use crate::error::{DocStoreError, Result};
use crate::value_utils::{compare_values_with_none, get_nested_value};

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection document: field → 1 (include) or 0 (exclude)
    pub projection: Option<Value>,

    /// Sort: [(field, direction)], direction: 1 (asc) or -1 (desc)
    pub sort: Option<Vec<(String, i32)>>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Compiled projection
///
/// Inclusion mode keeps only the named fields (plus `_id` unless it is
/// excluded with `0`); exclusion mode drops the named fields. Dotted paths
/// select inside embedded documents and through arrays of documents.
/// Output fields keep the order they have in the source document.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docstore_core::find_options::Projection;
///
/// let projection = Projection::from_json(&json!({"_id": 0, "name": 1})).unwrap();
/// let doc = json!({"_id": 1, "name": "Alice", "age": 20});
/// assert_eq!(projection.apply(doc.as_object().unwrap()), *json!({"name": "Alice"}).as_object().unwrap());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    mode: ProjectionMode,
    tree: Map<String, Value>,
    include_id: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ProjectionMode {
    /// No fields named: documents pass through unchanged
    #[default]
    Identity,
    Include,
    Exclude,
}

impl Projection {
    pub fn from_json(spec: &Value) -> Result<Self> {
        let map = match spec {
            Value::Null => return Ok(Projection::identity()),
            Value::Object(map) => map,
            other => {
                return Err(DocStoreError::InvalidQuery(format!(
                    "projection must be an object, got {}",
                    other
                )))
            }
        };

        let mut include_id = true;
        let mut inclusions = Vec::new();
        let mut exclusions = Vec::new();

        for (field, flag) in map {
            let keep = projection_flag(field, flag)?;
            if field == ID_FIELD {
                include_id = keep;
            } else if keep {
                inclusions.push(field.as_str());
            } else {
                exclusions.push(field.as_str());
            }
        }

        if !inclusions.is_empty() && !exclusions.is_empty() {
            return Err(DocStoreError::InvalidQuery(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }

        if !inclusions.is_empty() {
            return Projection::including(&inclusions, include_id);
        }
        if exclusions.is_empty() && include_id {
            return Ok(Projection::identity());
        }

        let mut tree = Map::new();
        for field in exclusions {
            insert_path(&mut tree, field)?;
        }
        Ok(Projection {
            mode: ProjectionMode::Exclude,
            tree,
            include_id,
        })
    }

    /// Inclusion projection over `fields`; may be empty, keeping only `_id`
    pub fn including(fields: &[&str], include_id: bool) -> Result<Self> {
        let mut tree = Map::new();
        for field in fields {
            insert_path(&mut tree, field)?;
        }
        Ok(Projection {
            mode: ProjectionMode::Include,
            tree,
            include_id,
        })
    }

    pub fn identity() -> Self {
        Projection {
            mode: ProjectionMode::Identity,
            tree: Map::new(),
            include_id: true,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.mode == ProjectionMode::Identity
    }

    pub fn apply(&self, fields: &Map<String, Value>) -> Map<String, Value> {
        match self.mode {
            ProjectionMode::Identity => fields.clone(),
            ProjectionMode::Include => {
                let mut out = Map::new();
                for (key, value) in fields {
                    if key == ID_FIELD {
                        if self.include_id {
                            out.insert(key.clone(), value.clone());
                        }
                        continue;
                    }
                    if let Some(node) = self.tree.get(key) {
                        if let Some(projected) = include_value(value, node) {
                            out.insert(key.clone(), projected);
                        }
                    }
                }
                out
            }
            ProjectionMode::Exclude => {
                let mut out = Map::new();
                for (key, value) in fields {
                    if key == ID_FIELD {
                        if self.include_id {
                            out.insert(key.clone(), value.clone());
                        }
                        continue;
                    }
                    match self.tree.get(key) {
                        Some(Value::Bool(true)) => {}
                        Some(Value::Object(sub)) => {
                            out.insert(key.clone(), exclude_value(value, sub));
                        }
                        _ => {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                }
                out
            }
        }
    }
}

/// Accepts 1/0, true/false and other numbers (non-zero keeps)
fn projection_flag(field: &str, flag: &Value) -> Result<bool> {
    match flag {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        other => Err(DocStoreError::InvalidQuery(format!(
            "unsupported projection value for '{}': {}",
            field, other
        ))),
    }
}

/// Leaves are `true`, branches are nested objects
fn insert_path(tree: &mut Map<String, Value>, field: &str) -> Result<()> {
    let parts: Vec<&str> = field.split('.').collect();
    if parts.iter().any(|p| p.is_empty() || p.starts_with('$')) {
        return Err(DocStoreError::InvalidPath {
            path: field.to_string(),
            reason: "unsupported projection path".to_string(),
        });
    }

    let mut node = tree;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        if last {
            node.insert(part.to_string(), Value::Bool(true));
            return Ok(());
        }
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(sub) => node = sub,
            // a shorter path already selects the whole subtree
            _ => return Ok(()),
        }
    }
    Ok(())
}

fn include_value(value: &Value, node: &Value) -> Option<Value> {
    match node {
        Value::Object(sub) => match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, inner) in map {
                    if let Some(child) = sub.get(key) {
                        if let Some(projected) = include_value(inner, child) {
                            out.insert(key.clone(), projected);
                        }
                    }
                }
                Some(Value::Object(out))
            }
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter(|item| item.is_object() || item.is_array())
                    .filter_map(|item| include_value(item, node))
                    .collect(),
            )),
            _ => None,
        },
        _ => Some(value.clone()),
    }
}

fn exclude_value(value: &Value, sub: &Map<String, Value>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                match sub.get(key) {
                    Some(Value::Bool(true)) => {}
                    Some(Value::Object(deeper)) => {
                        out.insert(key.clone(), exclude_value(inner, deeper));
                    }
                    _ => {
                        out.insert(key.clone(), inner.clone());
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| exclude_value(item, sub)).collect()),
        other => other.clone(),
    }
}

/// Parse a sort document `{field: 1 | -1, ...}`, keeping key order
pub fn parse_sort(spec: &Value) -> Result<Vec<(String, i32)>> {
    let Value::Object(map) = spec else {
        return Err(DocStoreError::InvalidQuery(format!(
            "sort must be an object, got {}",
            spec
        )));
    };
    map.iter()
        .map(|(field, direction)| match direction.as_i64() {
            Some(1) => Ok((field.clone(), 1)),
            Some(-1) => Ok((field.clone(), -1)),
            _ => Err(DocStoreError::InvalidQuery(format!(
                "sort direction for '{}' must be 1 or -1",
                field
            ))),
        })
        .collect()
}

/// Apply sort to documents
/// Supports dot notation for nested fields (e.g., "address.city"). Stable.
pub fn apply_sort(docs: &mut [Value], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let cmp = compare_values_with_none(get_nested_value(a, field), get_nested_value(b, field));
            if cmp != std::cmp::Ordering::Equal {
                return if *direction >= 0 { cmp } else { cmp.reverse() };
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Apply limit and skip to documents
pub fn apply_limit_skip<T>(docs: Vec<T>, limit: Option<usize>, skip: Option<usize>) -> Vec<T> {
    docs.into_iter()
        .skip(skip.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(doc: Value, spec: Value) -> Value {
        let projection = Projection::from_json(&spec).unwrap();
        Value::Object(projection.apply(doc.as_object().unwrap()))
    }

    #[test]
    fn test_projection_include_mode() {
        let doc = json!({"_id": 1, "name": "Alice", "age": 30, "city": "NYC"});
        let result = project(doc, json!({"name": 1, "age": 1}));
        assert_eq!(result, json!({"_id": 1, "name": "Alice", "age": 30}));
    }

    #[test]
    fn test_projection_exclude_id_keeps_document_order() {
        let doc = json!({
            "_id": 1,
            "name": "Alice",
            "courses": [{"code": "CS101", "grade": "A"}],
            "year": 2
        });
        let result = project(doc, json!({"courses": 1, "_id": 0, "name": 1}));
        let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["name", "courses"]);
    }

    #[test]
    fn test_projection_exclude_mode() {
        let doc = json!({"_id": 1, "name": "Alice", "age": 30, "city": "NYC"});
        let result = project(doc, json!({"city": 0}));
        assert_eq!(result, json!({"_id": 1, "name": "Alice", "age": 30}));
    }

    #[test]
    fn test_projection_only_id_excluded() {
        let doc = json!({"_id": 1, "name": "Alice"});
        assert_eq!(project(doc, json!({"_id": 0})), json!({"name": "Alice"}));
    }

    #[test]
    fn test_projection_empty_is_identity() {
        let doc = json!({"_id": 1, "name": "Alice"});
        assert!(Projection::from_json(&json!({})).unwrap().is_identity());
        assert_eq!(project(doc.clone(), json!({})), doc);
    }

    #[test]
    fn test_projection_dot_notation() {
        let doc = json!({
            "_id": 1,
            "name": "Alice",
            "address": {"city": "NYC", "street": "123 Main St", "zip": "10001"}
        });
        let result = project(doc, json!({"address.city": 1, "name": 1}));
        assert_eq!(
            result,
            json!({"_id": 1, "name": "Alice", "address": {"city": "NYC"}})
        );
    }

    #[test]
    fn test_projection_dot_notation_through_array() {
        let doc = json!({
            "_id": 2,
            "courses": [{"code": "CS101", "grade": "A-"}, {"code": "PH101", "grade": "B"}, 5]
        });
        let result = project(doc, json!({"courses.code": 1, "_id": 0}));
        assert_eq!(result, json!({"courses": [{"code": "CS101"}, {"code": "PH101"}]}));
    }

    #[test]
    fn test_projection_nested_exclusion() {
        let doc = json!({"_id": 1, "address": {"city": "NYC", "zip": "10001"}});
        let result = project(doc, json!({"address.zip": 0}));
        assert_eq!(result, json!({"_id": 1, "address": {"city": "NYC"}}));
    }

    #[test]
    fn test_projection_rejects_mixed_modes() {
        assert!(matches!(
            Projection::from_json(&json!({"a": 1, "b": 0})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(Projection::from_json(&json!({"a": "yes"})).is_err());
        assert!(Projection::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_sort_multi_field() {
        let mut docs = vec![
            json!({"age": 30, "name": "Bob"}),
            json!({"age": 25, "name": "Alice"}),
            json!({"age": 30, "name": "Carol"}),
        ];
        apply_sort(&mut docs, &[("age".to_string(), 1), ("name".to_string(), -1)]);
        assert_eq!(docs[0]["name"], "Alice");
        assert_eq!(docs[1]["name"], "Carol");
        assert_eq!(docs[2]["name"], "Bob");
    }

    #[test]
    fn test_sort_dot_notation_with_missing_field() {
        let mut docs = vec![
            json!({"name": "Alice", "address": {"zip": 10000}}),
            json!({"name": "Bob"}),
            json!({"name": "Charlie", "address": {"zip": 30000}}),
        ];
        apply_sort(&mut docs, &[("address.zip".to_string(), -1)]);
        assert_eq!(docs[0]["name"], "Charlie");
        assert_eq!(docs[1]["name"], "Alice");
        assert_eq!(docs[2]["name"], "Bob");
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(
            parse_sort(&json!({"credits": -1, "title": 1})).unwrap(),
            vec![("credits".to_string(), -1), ("title".to_string(), 1)]
        );
        assert!(parse_sort(&json!({"credits": 2})).is_err());
    }

    #[test]
    fn test_limit_skip() {
        let docs: Vec<i32> = (1..=5).collect();
        assert_eq!(apply_limit_skip(docs.clone(), Some(2), Some(1)), vec![2, 3]);
        assert_eq!(apply_limit_skip(docs.clone(), None, Some(3)), vec![4, 5]);
        assert_eq!(apply_limit_skip(docs.clone(), Some(3), None), vec![1, 2, 3]);
        assert!(apply_limit_skip(docs, None, Some(10)).is_empty());
    }
}
