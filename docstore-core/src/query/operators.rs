// docstore-core/src/query/operators.rs
//! Query operator trait and implementations
//!
//! Each operator is a separate type implementing `OperatorMatcher`, looked up
//! by name in `OPERATOR_REGISTRY` when a filter is compiled.
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌──────────────────────────┬────────────────┐
//! │ Comparison               │ Element        │
//! │ ($eq, $ne, $gt, $in ...) │ ($exists)      │
//! └──────────────────────────┴────────────────┘
//! ```
//!
//! Logical operators (`$and`, `$or`) combine whole sub-filters and live in
//! the parent module.

use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{DocStoreError, Result};
use crate::value_utils::{compare_values, values_equal};

/// How an operator combines the values reached through an array-traversing path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Matches when any reached value matches
    AnyValue,
    /// Matches when no reached value matches the named positive operator
    NoneOf(&'static str),
    /// Matches on whether any value is reachable at all
    Presence,
}

/// Trait for all field-level query operators
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use docstore_core::query::operators::{EqOperator, OperatorMatcher};
///
/// assert!(EqOperator.matches(Some(&json!("Alice")), &json!("Alice")));
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator name, e.g. "$eq"
    fn name(&self) -> &'static str;

    /// Checks the operand once, when the filter is compiled
    fn validate(&self, _operand: &Value) -> Result<()> {
        Ok(())
    }

    fn path_mode(&self) -> PathMode {
        PathMode::AnyValue
    }

    /// Checks a single document value (None if the field is missing)
    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool;
}

impl fmt::Debug for dyn OperatorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq: equality, with array element matching
///
/// `{field: value}` is shorthand for `{field: {$eq: value}}`. An array field
/// matches when the whole array or any element equals the operand. A missing
/// field matches `null`.
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        match doc_value {
            None => operand.is_null(),
            Some(v) => {
                if values_equal(v, operand) {
                    return true;
                }
                match v {
                    Value::Array(arr) => arr.iter().any(|elem| values_equal(elem, operand)),
                    _ => false,
                }
            }
        }
    }
}

/// $ne: no reached value equals the operand (true for missing fields)
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn path_mode(&self) -> PathMode {
        PathMode::NoneOf("$eq")
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        !EqOperator.matches(doc_value, operand)
    }
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        compare_with_predicate(doc_value, operand, |ord| ord.is_gt())
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        compare_with_predicate(doc_value, operand, |ord| ord.is_ge())
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        compare_with_predicate(doc_value, operand, |ord| ord.is_lt())
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        compare_with_predicate(doc_value, operand, |ord| ord.is_le())
    }
}

/// $in: the value equals any operand element
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        require_array(self.name(), operand)
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        operand
            .as_array()
            .map(|candidates| {
                candidates
                    .iter()
                    .any(|candidate| EqOperator.matches(doc_value, candidate))
            })
            .unwrap_or(false)
    }
}

/// $nin: no reached value equals any operand element
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        require_array(self.name(), operand)
    }

    fn path_mode(&self) -> PathMode {
        PathMode::NoneOf("$in")
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        !InOperator.matches(doc_value, operand)
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists: whether the field is present
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn validate(&self, operand: &Value) -> Result<()> {
        if operand.is_boolean() {
            Ok(())
        } else {
            Err(DocStoreError::InvalidQuery(
                "$exists requires a boolean".to_string(),
            ))
        }
    }

    fn path_mode(&self) -> PathMode {
        PathMode::Presence
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        doc_value.is_some() == operand.as_bool().unwrap_or(true)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

lazy_static! {
    static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let operators: Vec<Box<dyn OperatorMatcher>> = vec![
            Box::new(EqOperator),
            Box::new(NeOperator),
            Box::new(GtOperator),
            Box::new(GteOperator),
            Box::new(LtOperator),
            Box::new(LteOperator),
            Box::new(InOperator),
            Box::new(NinOperator),
            Box::new(ExistsOperator),
        ];
        operators.into_iter().map(|op| (op.name(), op)).collect()
    };
}

/// Look up a field-level operator by name
pub fn lookup_operator(name: &str) -> Option<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY.get(name).map(|op| op.as_ref())
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn require_array(op_name: &str, operand: &Value) -> Result<()> {
    if operand.is_array() {
        Ok(())
    } else {
        Err(DocStoreError::InvalidQuery(format!(
            "{} requires an array",
            op_name
        )))
    }
}

/// Shared body of $gt, $gte, $lt, $lte: direct comparison, then array elements
fn compare_with_predicate<F>(doc_value: Option<&Value>, operand: &Value, predicate: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let Some(v) = doc_value else {
        return false;
    };
    if compare_values(v, operand).map(&predicate).unwrap_or(false) {
        return true;
    }
    match v {
        Value::Array(arr) => arr.iter().any(|elem| {
            compare_values(elem, operand)
                .map(&predicate)
                .unwrap_or(false)
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_operator() {
        let op = EqOperator;
        assert!(op.matches(Some(&json!("Alice")), &json!("Alice")));
        assert!(!op.matches(Some(&json!("Bob")), &json!("Alice")));
        assert!(op.matches(Some(&json!(["a", "b"])), &json!("b")));
        assert!(op.matches(Some(&json!(["a", "b"])), &json!(["a", "b"])));
        assert!(op.matches(Some(&json!(4)), &json!(4.0)));
        assert!(op.matches(None, &json!(null)));
        assert!(!op.matches(None, &json!("x")));
    }

    #[test]
    fn test_ne_operator() {
        let op = NeOperator;
        assert!(op.matches(Some(&json!(1)), &json!(2)));
        assert!(!op.matches(Some(&json!(2)), &json!(2)));
        assert!(op.matches(None, &json!(2)));
        assert_eq!(op.path_mode(), PathMode::NoneOf("$eq"));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(GtOperator.matches(Some(&json!(10)), &json!(5)));
        assert!(!GtOperator.matches(Some(&json!(5)), &json!(5)));
        assert!(GteOperator.matches(Some(&json!(5)), &json!(5)));
        assert!(LtOperator.matches(Some(&json!("a")), &json!("b")));
        assert!(LteOperator.matches(Some(&json!(3.0)), &json!(3)));
        assert!(!GtOperator.matches(None, &json!(5)));
        assert!(!GtOperator.matches(Some(&json!("10")), &json!(5)));
    }

    #[test]
    fn test_comparison_array_elements() {
        assert!(GtOperator.matches(Some(&json!([1, 7])), &json!(5)));
        assert!(!LtOperator.matches(Some(&json!([6, 7])), &json!(5)));
    }

    #[test]
    fn test_in_and_nin() {
        let candidates = json!(["CS101", "PH101"]);
        assert!(InOperator.matches(Some(&json!("PH101")), &candidates));
        assert!(!InOperator.matches(Some(&json!("MA101")), &candidates));
        assert!(NinOperator.matches(Some(&json!("MA101")), &candidates));
        assert!(InOperator.validate(&json!("CS101")).is_err());
        assert!(NinOperator.validate(&json!({})).is_err());
    }

    #[test]
    fn test_exists() {
        assert!(ExistsOperator.matches(Some(&json!(null)), &json!(true)));
        assert!(ExistsOperator.matches(None, &json!(false)));
        assert!(!ExistsOperator.matches(None, &json!(true)));
        assert!(ExistsOperator.validate(&json!(1)).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(lookup_operator("$gte").map(|op| op.name()), Some("$gte"));
        assert!(lookup_operator("$regex").is_none());
        assert!(lookup_operator("$and").is_none());
    }
}
