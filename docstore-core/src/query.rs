// docstore-core/src/query.rs
//! Query module for MongoDB-like filters
//!
//! A filter is compiled once into a `Query` (unknown operators and malformed
//! operands are rejected here) and then evaluated against documents.
//!
//! ```ignore
//! let query = Query::from_json(&json!({"name": "Bob", "courses.code": "PH101"}))?;
//! if let Some(outcome) = query.match_document(&doc) {
//!     // outcome.positional == Some(1): courses[1] satisfied the filter
//! }
//! ```
//!
//! Dotted paths fan out over arrays: `"courses.code"` matches when any
//! element of `courses` has the given `code`. The index of that element is
//! reported so the update applier can resolve `$`.

pub mod operators;

use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::{DocStoreError, Result};
use crate::path::{segment_index, FieldPath};
use operators::{lookup_operator, OperatorMatcher, PathMode};

/// Result of a successful match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    /// Array index of the first element that satisfied the last
    /// array-matching clause, if any clause went through an array
    pub positional: Option<usize>,
}

/// Compiled query filter. Top-level clauses are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
enum Clause {
    Field {
        path: FieldPath,
        predicates: Vec<Predicate>,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
}

#[derive(Debug, Clone)]
struct Predicate {
    op: &'static dyn OperatorMatcher,
    operand: Value,
}

/// One value reached while walking a path, with the outermost array index
/// taken on the way there
#[derive(Debug, Clone, Copy)]
struct Leaf<'a> {
    value: Option<&'a Value>,
    array_index: Option<usize>,
}

impl Query {
    /// Empty query: matches every document
    pub fn new() -> Self {
        Query::default()
    }

    /// Compile a filter document
    pub fn from_json(filter: &Value) -> Result<Self> {
        match filter {
            Value::Object(map) => Query::from_map(map),
            Value::Null => Ok(Query::new()),
            other => Err(DocStoreError::InvalidQuery(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let mut clauses = Vec::with_capacity(map.len());

        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Clause::And(parse_sub_queries("$and", value)?),
                "$or" => Clause::Or(parse_sub_queries("$or", value)?),
                _ if key.starts_with('$') => {
                    return Err(DocStoreError::InvalidQuery(format!(
                        "unknown top-level operator '{}'",
                        key
                    )))
                }
                _ => {
                    let path = FieldPath::parse(key)?;
                    // `$` belongs to update paths only
                    path.field_names()?;
                    Clause::Field {
                        path,
                        predicates: parse_condition(value)?,
                    }
                }
            };
            clauses.push(clause);
        }

        Ok(Query { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.match_document(document).is_some()
    }

    /// Evaluate against a document, reporting the positional index on success
    pub fn match_document(&self, document: &Document) -> Option<MatchOutcome> {
        self.match_fields(document.fields())
    }

    /// Evaluate against a raw object (used by the `$match` stage)
    pub fn match_fields(&self, fields: &Map<String, Value>) -> Option<MatchOutcome> {
        let mut outcome = MatchOutcome::default();
        for clause in &self.clauses {
            let positional = clause.evaluate(fields)?;
            if positional.is_some() {
                outcome.positional = positional;
            }
        }
        Some(outcome)
    }
}

impl Clause {
    /// `None` when the clause fails, otherwise the positional index it produced
    fn evaluate(&self, fields: &Map<String, Value>) -> Option<Option<usize>> {
        match self {
            Clause::Field { path, predicates } => {
                let parts: Vec<&str> = path.segments_as_fields();
                let leaves = resolve_leaves(fields, &parts);
                let mut positional = None;
                for predicate in predicates {
                    let found = predicate.evaluate(&leaves)?;
                    if found.is_some() {
                        positional = found;
                    }
                }
                Some(positional)
            }
            Clause::And(queries) => {
                let mut positional = None;
                for query in queries {
                    let outcome = query.match_fields(fields)?;
                    if outcome.positional.is_some() {
                        positional = outcome.positional;
                    }
                }
                Some(positional)
            }
            Clause::Or(queries) => queries
                .iter()
                .find_map(|query| query.match_fields(fields))
                .map(|outcome| outcome.positional),
        }
    }
}

impl Predicate {
    fn evaluate(&self, leaves: &[Leaf<'_>]) -> Option<Option<usize>> {
        match self.op.path_mode() {
            PathMode::AnyValue => leaves.iter().find_map(|leaf| {
                if !self.op.matches(leaf.value, &self.operand) {
                    return None;
                }
                Some(leaf.array_index.or_else(|| self.element_index(leaf.value)))
            }),
            PathMode::NoneOf(positive) => {
                let positive = lookup_operator(positive)?;
                let any = leaves
                    .iter()
                    .any(|leaf| positive.matches(leaf.value, &self.operand));
                (!any).then_some(None)
            }
            PathMode::Presence => {
                let present = leaves.iter().any(|leaf| leaf.value.is_some());
                let wanted = self.operand.as_bool().unwrap_or(true);
                (present == wanted).then_some(None)
            }
        }
    }

    /// When the leaf itself is an array and the operator matched one of its
    /// elements, the index of the first such element
    fn element_index(&self, value: Option<&Value>) -> Option<usize> {
        let Some(Value::Array(arr)) = value else {
            return None;
        };
        arr.iter()
            .position(|elem| self.op.matches(Some(elem), &self.operand))
    }
}

impl FieldPath {
    /// Segments as plain names. Only called on paths already checked by
    /// `field_names`, so positional segments never appear here.
    fn segments_as_fields(&self) -> Vec<&str> {
        self.field_names().unwrap_or_default()
    }
}

fn parse_sub_queries(op: &str, value: &Value) -> Result<Vec<Query>> {
    let Value::Array(items) = value else {
        return Err(DocStoreError::InvalidQuery(format!(
            "{} requires an array of filters",
            op
        )));
    };
    if items.is_empty() {
        return Err(DocStoreError::InvalidQuery(format!(
            "{} requires a non-empty array",
            op
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => Query::from_map(map),
            other => Err(DocStoreError::InvalidQuery(format!(
                "{} entries must be objects, got {}",
                op, other
            ))),
        })
        .collect()
}

/// `{"$gt": 1, "$lt": 5}` becomes two predicates; anything else is equality
fn parse_condition(value: &Value) -> Result<Vec<Predicate>> {
    let eq = || -> Result<Vec<Predicate>> {
        let op = lookup_operator("$eq")
            .ok_or_else(|| DocStoreError::InvalidQuery("$eq is not registered".to_string()))?;
        Ok(vec![Predicate {
            op,
            operand: value.clone(),
        }])
    };

    let Value::Object(map) = value else {
        return eq();
    };
    let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        return eq();
    }
    if operator_keys != map.len() {
        return Err(DocStoreError::InvalidQuery(
            "cannot mix operators and plain fields in one condition".to_string(),
        ));
    }

    map.iter()
        .map(|(name, operand)| {
            let op = lookup_operator(name).ok_or_else(|| {
                DocStoreError::InvalidQuery(format!("unknown operator '{}'", name))
            })?;
            op.validate(operand)?;
            Ok(Predicate {
                op,
                operand: operand.clone(),
            })
        })
        .collect()
}

/// Walk `parts` from the document root, fanning out over arrays.
/// Dead ends produce a leaf with no value so that `null` and `$exists`
/// can see missing fields.
fn resolve_leaves<'a>(fields: &'a Map<String, Value>, parts: &[&str]) -> Vec<Leaf<'a>> {
    let mut out = Vec::new();
    match parts.split_first() {
        None => {}
        Some((head, rest)) => match fields.get(*head) {
            Some(next) => walk(next, rest, None, &mut out),
            None => out.push(Leaf {
                value: None,
                array_index: None,
            }),
        },
    }
    out
}

fn walk<'a>(current: &'a Value, parts: &[&str], array_index: Option<usize>, out: &mut Vec<Leaf<'a>>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(Leaf {
            value: Some(current),
            array_index,
        });
        return;
    };

    let missing = Leaf {
        value: None,
        array_index,
    };

    match current {
        Value::Object(map) => match map.get(*head) {
            Some(next) => walk(next, rest, array_index, out),
            None => out.push(missing),
        },
        Value::Array(arr) => {
            if let Some(index) = segment_index(head) {
                match arr.get(index) {
                    Some(next) => walk(next, rest, array_index.or(Some(index)), out),
                    None => out.push(missing),
                }
            } else if arr.is_empty() {
                out.push(missing);
            } else {
                for (i, elem) in arr.iter().enumerate() {
                    walk(elem, parts, array_index.or(Some(i)), out);
                }
            }
        }
        _ => out.push(missing),
    }
}

/// One-shot convenience: compile `filter` and test `document`
pub fn matches_filter(document: &Document, filter: &Value) -> Result<bool> {
    Ok(Query::from_json(filter)?.matches(document))
}
