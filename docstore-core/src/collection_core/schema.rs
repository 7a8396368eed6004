// docstore-core/src/collection_core/schema.rs
// Compiled $jsonSchema subset checked on insert

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{DocStoreError, Result};

/// Compiled property schema with extended validation constraints
#[derive(Clone, Debug)]
pub struct PropertySchema {
    pub types: Vec<SchemaType>,          // any of these; empty = unconstrained
    pub enum_values: Option<Vec<Value>>, // enum validation
    pub pattern: Option<Regex>,          // regex pattern validation
    pub min_items: Option<usize>,        // array minimum length
    pub max_items: Option<usize>,        // array maximum length
}

impl PropertySchema {
    pub fn new(types: Vec<SchemaType>) -> Self {
        Self {
            types,
            enum_values: None,
            pattern: None,
            min_items: None,
            max_items: None,
        }
    }
}

/// `$jsonSchema`-style validator bound to a collection
#[derive(Clone, Debug)]
pub struct CompiledSchema {
    source: Value,
    pub(super) required: Vec<String>,
    pub(super) properties: Vec<(String, PropertySchema)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaType {
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    Number,
    String,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "int" => Some(Self::Int),
            "long" | "integer" => Some(Self::Long),
            "double" | "number" | "decimal" => Some(Self::Number),
            "string" => Some(Self::String),
            "bool" | "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::Int => value.as_i64().is_some_and(|n| i32::try_from(n).is_ok()),
            SchemaType::Long => value.is_i64(),
            SchemaType::Number => value.is_number(),
            SchemaType::String => value.is_string(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::Null => value.is_null(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Int => "int",
            SchemaType::Long => "long",
            SchemaType::Number => "number",
            SchemaType::String => "string",
            SchemaType::Boolean => "bool",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::Null => "null",
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(n) if n.as_i64().is_some_and(|i| i32::try_from(i).is_ok()) => "int",
        Value::Number(_) => "long",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `"string"` or `["int", "null"]`
fn parse_type_tags(field: &str, tags: &Value) -> Result<Vec<SchemaType>> {
    let parse_one = |tag: &Value| -> Result<SchemaType> {
        let tag_str = tag.as_str().ok_or_else(|| {
            DocStoreError::SchemaError(format!("Property '{}' type must be a string", field))
        })?;
        SchemaType::from_str(tag_str).ok_or_else(|| {
            DocStoreError::SchemaError(format!(
                "Unsupported type '{}' for field '{}'",
                tag_str, field
            ))
        })
    };

    match tags {
        Value::Array(list) => list.iter().map(parse_one).collect(),
        single => Ok(vec![parse_one(single)?]),
    }
}

fn non_negative(field: &str, key: &str, value: &Value) -> Result<usize> {
    value.as_u64().map(|n| n as usize).ok_or_else(|| {
        DocStoreError::SchemaError(format!(
            "Property '{}' {} must be a non-negative integer",
            field, key
        ))
    })
}

impl CompiledSchema {
    /// Compile a schema body, or a `{"$jsonSchema": body}` validator
    pub fn from_value(schema: &Value) -> Result<Self> {
        let obj = schema.as_object().ok_or_else(|| {
            DocStoreError::SchemaError("Schema must be a JSON object".to_string())
        })?;
        let body = match obj.get("$jsonSchema") {
            Some(Value::Object(inner)) => inner,
            Some(_) => {
                return Err(DocStoreError::SchemaError(
                    "$jsonSchema must be a JSON object".to_string(),
                ))
            }
            None => obj,
        };

        for key in ["bsonType", "type"] {
            if let Some(root_type) = body.get(key) {
                if parse_type_tags("<root>", root_type)? != vec![SchemaType::Object] {
                    return Err(DocStoreError::SchemaError(
                        "Only object schemas are supported".to_string(),
                    ));
                }
            }
        }

        let mut required = Vec::new();
        if let Some(required_value) = body.get("required") {
            let arr = required_value.as_array().ok_or_else(|| {
                DocStoreError::SchemaError("required must be an array of field names".to_string())
            })?;
            for entry in arr {
                let field = entry.as_str().ok_or_else(|| {
                    DocStoreError::SchemaError("required entries must be strings".to_string())
                })?;
                required.push(field.to_string());
            }
        }

        let mut properties = Vec::new();
        if let Some(props) = body.get("properties") {
            let props_obj = props.as_object().ok_or_else(|| {
                DocStoreError::SchemaError("properties must be an object".to_string())
            })?;
            for (field, spec) in props_obj {
                properties.push((field.clone(), Self::compile_property(field, spec)?));
            }
        }

        Ok(Self {
            source: schema.clone(),
            required,
            properties,
        })
    }

    fn compile_property(field: &str, spec: &Value) -> Result<PropertySchema> {
        let spec: &Map<String, Value> = spec.as_object().ok_or_else(|| {
            DocStoreError::SchemaError(format!("Property '{}' must be an object", field))
        })?;

        // bsonType wins when both are given
        let types = match spec.get("bsonType").or_else(|| spec.get("type")) {
            Some(tags) => parse_type_tags(field, tags)?,
            None => Vec::new(),
        };
        let mut prop_schema = PropertySchema::new(types);

        if let Some(enum_value) = spec.get("enum") {
            let enum_arr = enum_value.as_array().ok_or_else(|| {
                DocStoreError::SchemaError(format!("Property '{}' enum must be an array", field))
            })?;
            prop_schema.enum_values = Some(enum_arr.clone());
        }

        if let Some(pattern_value) = spec.get("pattern") {
            let pattern_str = pattern_value.as_str().ok_or_else(|| {
                DocStoreError::SchemaError(format!(
                    "Property '{}' pattern must be a string",
                    field
                ))
            })?;
            let regex = Regex::new(pattern_str).map_err(|e| {
                DocStoreError::SchemaError(format!(
                    "Property '{}' has invalid regex pattern: {}",
                    field, e
                ))
            })?;
            prop_schema.pattern = Some(regex);
        }

        if let Some(min_value) = spec.get("minItems") {
            prop_schema.min_items = Some(non_negative(field, "minItems", min_value)?);
        }
        if let Some(max_value) = spec.get("maxItems") {
            prop_schema.max_items = Some(non_negative(field, "maxItems", max_value)?);
        }

        Ok(prop_schema)
    }

    /// The schema as it was given, for persistence and listing
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Every rule the document breaks; empty when it conforms
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let Some(obj) = value.as_object() else {
            return vec!["Document must be a JSON object".to_string()];
        };

        let mut violations = Vec::new();

        for field in &self.required {
            if !obj.contains_key(field) {
                violations.push(format!("Missing required field '{}'", field));
            }
        }

        for (field, prop_schema) in &self.properties {
            let Some(field_value) = obj.get(field) else {
                continue;
            };

            if !prop_schema.types.is_empty()
                && !prop_schema.types.iter().any(|t| t.matches(field_value))
            {
                let expected: Vec<&str> = prop_schema.types.iter().map(|t| t.as_str()).collect();
                violations.push(format!(
                    "Field '{}' expected type {}, got {}",
                    field,
                    expected.join(" or "),
                    value_type_name(field_value)
                ));
                continue;
            }

            if let Some(enum_values) = &prop_schema.enum_values {
                if !enum_values.contains(field_value) {
                    violations.push(format!(
                        "Field '{}' value {} not in allowed enum values",
                        field, field_value
                    ));
                }
            }

            // pattern applies to strings only
            if let (Some(pattern), Some(s)) = (&prop_schema.pattern, field_value.as_str()) {
                if !pattern.is_match(s) {
                    violations.push(format!(
                        "Field '{}' does not match required pattern '{}'",
                        field,
                        pattern.as_str()
                    ));
                }
            }

            if let Some(arr) = field_value.as_array() {
                if let Some(min) = prop_schema.min_items.filter(|min| arr.len() < *min) {
                    violations.push(format!(
                        "Field '{}' has {} items, minimum required is {}",
                        field,
                        arr.len(),
                        min
                    ));
                }
                if let Some(max) = prop_schema.max_items.filter(|max| arr.len() > *max) {
                    violations.push(format!(
                        "Field '{}' has {} items, maximum allowed is {}",
                        field,
                        arr.len(),
                        max
                    ));
                }
            }
        }

        violations
    }
}
