// docstore-core/src/aggregation.rs
// Aggregation pipeline implementation

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::document::ID_FIELD;
use crate::error::{DocStoreError, Result};
use crate::find_options::{apply_sort, parse_sort, Projection};
use crate::index::IndexKey;
use crate::query::Query;
use crate::value_utils::{
    as_numeric, collect_path_values, compare_values_with_none, get_nested_value,
    set_nested_value, values_equal, Numeric,
};

/// Read access to other collections for `$lookup`
pub trait LookupSource {
    /// Snapshot of every document of `collection` in insertion order.
    /// An unknown collection yields no documents.
    fn snapshot(&self, collection: &str) -> Vec<Value>;
}

impl LookupSource for HashMap<String, Vec<Value>> {
    fn snapshot(&self, collection: &str) -> Vec<Value> {
        self.get(collection).cloned().unwrap_or_default()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn agg_error(message: impl Into<String>) -> DocStoreError {
    DocStoreError::AggregationError(message.into())
}

/// Query and projection errors surface as aggregation errors inside a pipeline
fn in_stage(stage: &str, err: DocStoreError) -> DocStoreError {
    match err {
        DocStoreError::AggregationError(_) => err,
        other => agg_error(format!("{}: {}", stage, other)),
    }
}

/// Parse a field reference (e.g., "$fieldName" -> "fieldName")
fn parse_field_reference(value: &Value, op_name: &str) -> Result<String> {
    let Some(s) = value.as_str() else {
        return Err(agg_error(format!("{} must be a field reference", op_name)));
    };
    match s.strip_prefix('$') {
        Some(path) if !path.is_empty() && !path.starts_with('$') => Ok(path.to_string()),
        _ => Err(agg_error(format!(
            "{} field reference must look like \"$field\", got \"{}\"",
            op_name, s
        ))),
    }
}

/// Expression used by `$group` keys and accumulators
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `"$path"`
    Field(String),
    /// `{"a": "$x", "b": 1}`
    Object(Vec<(String, Expression)>),
    Constant(Value),
}

impl Expression {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s.starts_with('$') => {
                Ok(Expression::Field(parse_field_reference(value, "expression")?))
            }
            Value::Object(map) if !map.is_empty() => {
                if let Some(op) = map.keys().find(|k| k.starts_with('$')) {
                    return Err(agg_error(format!("unsupported expression operator '{}'", op)));
                }
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Expression::from_json(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Object(fields))
            }
            other => Ok(Expression::Constant(other.clone())),
        }
    }

    /// Missing fields evaluate to `None`
    pub fn evaluate(&self, doc: &Value) -> Option<Value> {
        match self {
            Expression::Field(path) => get_nested_value(doc, path).cloned(),
            Expression::Object(fields) => {
                let mut out = Map::new();
                for (key, expr) in fields {
                    if let Some(value) = expr.evaluate(doc) {
                        out.insert(key.clone(), value);
                    }
                }
                Some(Value::Object(out))
            }
            Expression::Constant(value) => Some(value.clone()),
        }
    }
}

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Unwind(UnwindStage),
    Lookup(LookupStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    projection: Projection,
    /// `{"newName": "$source.path"}` entries, applied after the projection
    computed: Vec<(String, String)>,
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    preserve_null_and_empty: bool,
}

/// $lookup stage - equality join against another collection
#[derive(Debug, Clone)]
pub struct LookupStage {
    from: String,
    local_field: String,
    foreign_field: String,
    as_field: String,
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Expression,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone)]
enum AccumulatorState {
    Sum { int: i64, float: f64, has_float: bool },
    Avg { sum: f64, count: u64 },
    Extremum(Option<Value>),
    First(Option<Value>),
    Last(Value),
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, i32)>,
}

/// $limit stage - limit number of documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $skip stage - skip documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

impl Pipeline {
    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Value::Array(stages_array) = pipeline_json else {
            return Err(agg_error("Pipeline must be an array"));
        };

        let stages = stages_array
            .iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Names of the foreign collections referenced by `$lookup` stages
    pub fn lookup_collections(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                Stage::Lookup(lookup) => Some(lookup.from.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Execute pipeline on documents, strictly in stage order
    pub fn execute(&self, mut docs: Vec<Value>, source: &dyn LookupSource) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs, source)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let Value::Object(obj) = stage_json else {
            return Err(agg_error("Stage must be an object"));
        };
        // Each stage should have exactly one key
        let mut entries = obj.iter();
        let (Some((stage_name, stage_spec)), None) = (entries.next(), entries.next()) else {
            return Err(agg_error("Each stage must have exactly one operator"));
        };

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$lookup" => Ok(Stage::Lookup(LookupStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => Ok(Stage::Limit(LimitStage::from_json(stage_spec)?)),
            "$skip" => Ok(Stage::Skip(SkipStage::from_json(stage_spec)?)),
            _ => Err(agg_error(format!("Unknown pipeline stage: {}", stage_name))),
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>, source: &dyn LookupSource) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => Ok(stage.execute(docs)),
            Stage::Project(stage) => Ok(stage.execute(docs)),
            Stage::Unwind(stage) => Ok(stage.execute(docs)),
            Stage::Lookup(stage) => Ok(stage.execute(docs, source)),
            Stage::Group(stage) => Ok(stage.execute(docs)),
            Stage::Sort(stage) => Ok(stage.execute(docs)),
            Stage::Limit(stage) => Ok(stage.execute(docs)),
            Stage::Skip(stage) => Ok(stage.execute(docs)),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let query = Query::from_json(spec).map_err(|e| in_stage("$match", e))?;
        Ok(MatchStage { query })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter()
            .filter(|doc| match doc {
                Value::Object(fields) => self.query.match_fields(fields).is_some(),
                _ => false,
            })
            .collect()
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(agg_error("$project must be an object"));
        };

        let mut flags = Map::new();
        let mut computed = Vec::new();
        for (field, value) in obj {
            match value {
                Value::String(_) => {
                    computed.push((field.clone(), parse_field_reference(value, "$project")?));
                }
                Value::Number(_) | Value::Bool(_) => {
                    flags.insert(field.clone(), value.clone());
                }
                _ => {
                    return Err(agg_error(
                        "Project field must be 0, 1, or field reference",
                    ))
                }
            }
        }

        let projection = if computed.is_empty() {
            Projection::from_json(&Value::Object(flags)).map_err(|e| in_stage("$project", e))?
        } else {
            // computed fields put the stage in inclusion mode
            if flags.iter().any(|(k, v)| k != ID_FIELD && is_falsy(v)) {
                return Err(agg_error(
                    "$project cannot mix exclusions with computed fields",
                ));
            }
            let include_id = flags.get(ID_FIELD).map(|v| !is_falsy(v)).unwrap_or(true);
            let included: Vec<&str> = flags
                .keys()
                .filter(|k| *k != ID_FIELD)
                .map(String::as_str)
                .collect();
            Projection::including(&included, include_id).map_err(|e| in_stage("$project", e))?
        };

        Ok(ProjectStage {
            projection,
            computed,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter()
            .map(|doc| {
                let Value::Object(fields) = &doc else {
                    return doc;
                };
                let mut projected = Value::Object(self.projection.apply(fields));
                for (target, source) in &self.computed {
                    if let Some(value) = get_nested_value(&doc, source) {
                        set_nested_value(&mut projected, target, value.clone());
                    }
                }
                projected
            })
            .collect()
    }
}

fn is_falsy(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(_) => Ok(UnwindStage {
                path: parse_field_reference(spec, "$unwind")?,
                preserve_null_and_empty: false,
            }),
            Value::Object(obj) => {
                let path = obj
                    .get("path")
                    .ok_or_else(|| agg_error("$unwind requires a path"))?;
                let preserve = match obj.get("preserveNullAndEmptyArrays") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(agg_error(
                            "$unwind preserveNullAndEmptyArrays must be a boolean",
                        ))
                    }
                };
                if let Some(unknown) = obj
                    .keys()
                    .find(|k| *k != "path" && *k != "preserveNullAndEmptyArrays")
                {
                    return Err(agg_error(format!("$unwind: unsupported option '{}'", unknown)));
                }
                Ok(UnwindStage {
                    path: parse_field_reference(path, "$unwind path")?,
                    preserve_null_and_empty: preserve,
                })
            }
            _ => Err(agg_error("$unwind must be a field reference or an object")),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            match get_nested_value(&doc, &self.path) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    let items = items.clone();
                    for item in items {
                        let mut unwound = doc.clone();
                        set_nested_value(&mut unwound, &self.path, item);
                        results.push(unwound);
                    }
                }
                // missing, null, or []
                None | Some(Value::Null) | Some(Value::Array(_)) => {
                    if self.preserve_null_and_empty {
                        results.push(doc);
                    }
                }
                // non-array values pass through unchanged
                Some(_) => results.push(doc),
            }
        }

        results
    }
}

/// Every value at `path`, with arrays at the end of the path opened up
fn join_values(doc: &Value, path: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for value in collect_path_values(doc, path) {
        match value {
            Value::Array(items) => {
                values.extend(items.iter().cloned());
                // the whole array also matches an equal array value
                values.push(value.clone());
            }
            other => values.push(other.clone()),
        }
    }
    if values.is_empty() {
        values.push(Value::Null);
    }
    values
}

impl LookupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(agg_error("$lookup must be an object"));
        };
        let field = |name: &str| -> Result<String> {
            match obj.get(name) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(_) => Err(agg_error(format!("$lookup {} must be a non-empty string", name))),
                None => Err(agg_error(format!("$lookup requires '{}'", name))),
            }
        };

        if let Some(unknown) = obj
            .keys()
            .find(|k| !matches!(k.as_str(), "from" | "localField" | "foreignField" | "as"))
        {
            return Err(agg_error(format!("$lookup: unsupported option '{}'", unknown)));
        }

        Ok(LookupStage {
            from: field("from")?,
            local_field: field("localField")?,
            foreign_field: field("foreignField")?,
            as_field: field("as")?,
        })
    }

    fn execute(&self, docs: Vec<Value>, source: &dyn LookupSource) -> Vec<Value> {
        let foreign: Vec<(Vec<Value>, Value)> = source
            .snapshot(&self.from)
            .into_iter()
            .map(|doc| (join_values(&doc, &self.foreign_field), doc))
            .collect();

        docs.into_iter()
            .map(|mut doc| {
                let local = join_values(&doc, &self.local_field);
                let matches: Vec<Value> = foreign
                    .iter()
                    .filter(|(keys, _)| {
                        keys.iter()
                            .any(|key| local.iter().any(|value| values_equal(value, key)))
                    })
                    .map(|(_, foreign_doc)| foreign_doc.clone())
                    .collect();
                set_nested_value(&mut doc, &self.as_field, Value::Array(matches));
                doc
            })
            .collect()
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(agg_error("$group must be an object"));
        };
        let id_value = obj
            .get(ID_FIELD)
            .ok_or_else(|| agg_error("Group stage must have _id field"))?;
        let id = Expression::from_json(id_value)?;

        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == ID_FIELD {
                continue;
            }
            if field.contains('.') {
                return Err(agg_error(format!(
                    "$group output field '{}' cannot contain '.'",
                    field
                )));
            }
            accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    /// Groups come out in the order their key was first seen. Keys compare
    /// like `$match` equality, so `1` and `1.0` share a group whose `_id` is
    /// the first value seen.
    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut keys: Vec<Value> = Vec::new();
        let mut states: Vec<Vec<AccumulatorState>> = Vec::new();
        let mut positions: HashMap<IndexKey, usize> = HashMap::new();

        for doc in &docs {
            let key = self.id.evaluate(doc).unwrap_or(Value::Null);
            let position = *positions.entry(IndexKey::from(Some(&key))).or_insert_with(|| {
                keys.push(key.clone());
                states.push(
                    self.accumulators
                        .iter()
                        .map(|(_, acc)| acc.initial_state())
                        .collect(),
                );
                keys.len() - 1
            });

            for ((_, accumulator), state) in self.accumulators.iter().zip(states[position].iter_mut()) {
                accumulator.accumulate(state, doc);
            }
        }

        keys.into_iter()
            .zip(states)
            .map(|(key, group_states)| {
                let mut result = Map::new();
                result.insert(ID_FIELD.to_string(), key);
                for ((field, _), state) in self.accumulators.iter().zip(group_states) {
                    result.insert(field.clone(), state.finish());
                }
                Value::Object(result)
            })
            .collect()
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(agg_error("Accumulator must be an object"));
        };
        let mut entries = obj.iter();
        let (Some((op, value)), None) = (entries.next(), entries.next()) else {
            return Err(agg_error("Accumulator must have exactly one operator"));
        };

        let expr = Expression::from_json(value)?;
        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(expr)),
            "$avg" => Ok(Accumulator::Avg(expr)),
            "$min" => Ok(Accumulator::Min(expr)),
            "$max" => Ok(Accumulator::Max(expr)),
            "$first" => Ok(Accumulator::First(expr)),
            "$last" => Ok(Accumulator::Last(expr)),
            _ => Err(agg_error(format!("Unknown accumulator: {}", op))),
        }
    }

    fn initial_state(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum {
                int: 0,
                float: 0.0,
                has_float: false,
            },
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) | Accumulator::Max(_) => AccumulatorState::Extremum(None),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
        }
    }

    fn accumulate(&self, state: &mut AccumulatorState, doc: &Value) {
        match (self, state) {
            (Accumulator::Sum(expr), AccumulatorState::Sum { int, float, has_float }) => {
                // missing or non-numeric values count as 0
                match expr.evaluate(doc).as_ref().and_then(as_numeric) {
                    Some(Numeric::Int(n)) => match int.checked_add(n) {
                        Some(total) => *int = total,
                        None => {
                            *float += *int as f64 + n as f64;
                            *int = 0;
                            *has_float = true;
                        }
                    },
                    Some(Numeric::Float(f)) => {
                        *float += f;
                        *has_float = true;
                    }
                    None => {}
                }
            }
            (Accumulator::Avg(expr), AccumulatorState::Avg { sum, count }) => {
                match expr.evaluate(doc).as_ref().and_then(as_numeric) {
                    Some(Numeric::Int(n)) => {
                        *sum += n as f64;
                        *count += 1;
                    }
                    Some(Numeric::Float(f)) => {
                        *sum += f;
                        *count += 1;
                    }
                    None => {}
                }
            }
            (Accumulator::Min(expr), AccumulatorState::Extremum(current))
            | (Accumulator::Max(expr), AccumulatorState::Extremum(current)) => {
                let Some(value) = expr.evaluate(doc).filter(|v| !v.is_null()) else {
                    return;
                };
                let wanted = if matches!(self, Accumulator::Min(_)) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let replace = match current {
                    None => true,
                    Some(existing) => compare_values_with_none(Some(&value), Some(existing)) == wanted,
                };
                if replace {
                    *current = Some(value);
                }
            }
            (Accumulator::First(expr), AccumulatorState::First(current)) => {
                if current.is_none() {
                    *current = Some(expr.evaluate(doc).unwrap_or(Value::Null));
                }
            }
            (Accumulator::Last(expr), AccumulatorState::Last(current)) => {
                *current = expr.evaluate(doc).unwrap_or(Value::Null);
            }
            _ => {}
        }
    }
}

impl AccumulatorState {
    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum { int, float, has_float } => {
                if has_float {
                    Value::from(float + int as f64)
                } else {
                    Value::from(int)
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if count > 0 {
                    Value::from(sum / count as f64)
                } else {
                    Value::Null
                }
            }
            AccumulatorState::Extremum(value) | AccumulatorState::First(value) => {
                value.unwrap_or(Value::Null)
            }
            AccumulatorState::Last(value) => value,
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(agg_error("$sort must be an object"));
        }
        let fields = parse_sort(spec).map_err(|e| in_stage("$sort", e))?;
        if fields.is_empty() {
            return Err(agg_error("$sort requires at least one field"));
        }
        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        apply_sort(&mut docs, &self.fields);
        docs
    }
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_u64() {
            Some(n) if n > 0 => Ok(LimitStage { limit: n as usize }),
            _ => Err(agg_error("$limit must be a positive integer")),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().take(self.limit).collect()
    }
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_u64() {
            Some(n) => Ok(SkipStage { skip: n as usize }),
            None => Err(agg_error("$skip must be a non-negative integer")),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().skip(self.skip).collect()
    }
}
