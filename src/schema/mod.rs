//! Schema compilation and validation.
//!
//! A [`SchemaDocument`] is compiled once, at agent construction, into a
//! [`SchemaValidator`]. After that, `validate()` is a pure function: the
//! same value against the same compiled validator always produces the same
//! ordered list of `(path, message)` issues.

use crate::error::{OrchestratorError, Result, ValidationIssue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The restricted JSON-Schema-like document a [`SchemaValidator`] compiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(rename = "type", default = "default_type")]
    pub schema_type: FieldType,
    #[serde(default)]
    pub properties: std::collections::BTreeMap<String, SchemaDocument>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_true")]
    pub additional_properties: bool,
    /// Only meaningful when `schema_type == Array`.
    #[serde(default)]
    pub items: Option<Box<SchemaDocument>>,
}

fn default_type() -> FieldType {
    FieldType::Object
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    /// Accepts any JSON value; used for fields whose shape this contract
    /// deliberately leaves to the domain agent.
    Any,
}

impl SchemaDocument {
    pub fn any() -> Self {
        Self {
            schema_type: FieldType::Any,
            properties: Default::default(),
            required: Vec::new(),
            additional_properties: true,
            items: None,
        }
    }

    pub fn object(
        properties: impl IntoIterator<Item = (&'static str, SchemaDocument)>,
        required: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            schema_type: FieldType::Object,
            properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            required: required.into_iter().map(str::to_string).collect(),
            additional_properties: false,
            items: None,
        }
    }
}

/// A schema compiled once and reused for every subsequent validation call.
///
/// Compilation today is cheap (structural clone of the document), but the
/// type exists so a future, more expensive compilation step (e.g. building
/// lookup tables for large schemas) never needs to touch call sites.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    document: SchemaDocument,
}

impl SchemaValidator {
    pub fn compile(document: SchemaDocument) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &SchemaDocument {
        &self.document
    }

    /// Validate `value` against the compiled schema. Returns `Ok(())` or an
    /// `OrchestratorError::Validation` carrying every issue found, in
    /// the order they were discovered (object keys in declaration order).
    pub fn validate(&self, value: &Value) -> Result<()> {
        let mut issues = Vec::new();
        validate_at("$", &self.document, value, &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Validation(issues))
        }
    }
}

fn validate_at(path: &str, schema: &SchemaDocument, value: &Value, issues: &mut Vec<ValidationIssue>) {
    if schema.schema_type == FieldType::Any {
        return;
    }

    if !type_matches(schema.schema_type, value) {
        issues.push((
            path.to_string(),
            format!("expected {:?}, found {}", schema.schema_type, kind_name(value)),
        ));
        return;
    }

    match schema.schema_type {
        FieldType::Object => validate_object(path, schema, value, issues),
        FieldType::Array => validate_array(path, schema, value, issues),
        _ => {}
    }
}

fn validate_object(path: &str, schema: &SchemaDocument, value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Value::Object(map) = value else {
        return;
    };

    for required in &schema.required {
        if !map.contains_key(required) {
            issues.push((format!("{path}.{required}"), "required field missing".to_string()));
        }
    }

    for (key, field_value) in map {
        match schema.properties.get(key) {
            Some(field_schema) => {
                validate_at(&format!("{path}.{key}"), field_schema, field_value, issues);
            }
            None if !schema.additional_properties => {
                issues.push((format!("{path}.{key}"), "unexpected property".to_string()));
            }
            None => {}
        }
    }
}

fn validate_array(path: &str, schema: &SchemaDocument, value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Value::Array(items) = value else {
        return;
    };
    let Some(item_schema) = &schema.items else {
        return;
    };
    for (i, item) in items.iter().enumerate() {
        validate_at(&format!("{path}[{i}]"), item_schema, item, issues);
    }
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Null => value.is_null(),
        FieldType::Any => true,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> SchemaValidator {
        SchemaValidator::compile(SchemaDocument::object(
            [
                ("name", SchemaDocument { schema_type: FieldType::String, ..SchemaDocument::any() }),
                ("age", SchemaDocument { schema_type: FieldType::Number, ..SchemaDocument::any() }),
            ],
            ["name"],
        ))
    }

    #[test]
    fn accepts_valid_value() {
        let v = user_schema();
        assert!(v.validate(&json!({"name": "ada", "age": 30})).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let v = user_schema();
        let err = v.validate(&json!({"age": 30})).unwrap_err();
        match err {
            OrchestratorError::Validation(issues) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].0, "$.name");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_property_when_closed() {
        let v = user_schema();
        let err = v.validate(&json!({"name": "ada", "extra": 1})).unwrap_err();
        match err {
            OrchestratorError::Validation(issues) => {
                assert!(issues.iter().any(|(p, _)| p == "$.extra"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn validation_is_idempotent() {
        let v = user_schema();
        let value = json!({"name": "ada"});
        let first = v.validate(&value).is_ok();
        let second = v.validate(&value).is_ok();
        assert_eq!(first, second);
    }

    #[test]
    fn any_schema_accepts_everything() {
        let v = SchemaValidator::compile(SchemaDocument::any());
        assert!(v.validate(&json!(42)).is_ok());
        assert!(v.validate(&json!(null)).is_ok());
        assert!(v.validate(&json!({"a": [1,2,3]})).is_ok());
    }
}
