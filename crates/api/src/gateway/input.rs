//! Input normalization and schema validation
//!
//! Operations declare their input as a JSON-Schema object (the subset in
//! use: `type`, `properties`, `required`, `enum`, `maxLength`,
//! `additionalProperties`). Callers may send either a structured object or
//! a flat string; a string is mapped into the schema's single named field.

use serde_json::{Map, Value};

/// First schema violation found, reported with its JSON path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Map the raw request input into a named-variable object.
///
/// A string input is placed into the schema's single declared property, or
/// under `input` when the schema declares none or several.
pub fn normalize(input: &Value, schema: &Value) -> Result<Map<String, Value>, Violation> {
    match input {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) => {
            let field = single_property_name(schema).unwrap_or("input");
            let mut map = Map::new();
            map.insert(field.to_string(), Value::String(s.clone()));
            Ok(map)
        }
        _ => Err(Violation::at(
            "$",
            "input must be an object or a string",
        )),
    }
}

fn single_property_name(schema: &Value) -> Option<&str> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.len() == 1 {
        properties.keys().next().map(String::as_str)
    } else {
        None
    }
}

/// Validate a value against the schema subset; returns the first violation
pub fn validate(value: &Value, schema: &Value) -> Result<(), Violation> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), Violation> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            return Err(Violation::at(
                path,
                format!("expected {}, got {}", expected, type_name(value)),
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(Violation::at(path, "value is not one of the allowed values"));
        }
    }

    if let (Some(max), Value::String(s)) = (
        schema.get("maxLength").and_then(Value::as_u64),
        value,
    ) {
        if s.chars().count() as u64 > max {
            return Err(Violation::at(
                path,
                format!("string exceeds maxLength of {}", max),
            ));
        }
    }

    if let Value::Object(map) = value {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return Err(Violation::at(
                        &format!("{}.{}", path, name),
                        "required field is missing",
                    ));
                }
            }
        }

        if schema.get("additionalProperties").and_then(Value::as_bool) == Some(false) {
            for key in map.keys() {
                if !properties.is_some_and(|p| p.contains_key(key)) {
                    return Err(Violation::at(
                        &format!("{}.{}", path, key),
                        "unexpected field",
                    ));
                }
            }
        }

        if let Some(properties) = properties {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = map.get(key) {
                    validate_at(sub_value, sub_schema, &format!("{}.{}", path, key))?;
                }
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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

    fn prompt_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "maxLength": 2000 }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_string_maps_into_single_field() {
        let vars = normalize(&json!("hello"), &prompt_schema()).unwrap();
        assert_eq!(vars.get("prompt"), Some(&json!("hello")));
    }

    #[test]
    fn test_string_falls_back_to_input_field() {
        let schema = json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "tone": { "type": "string" }
            }
        });
        let vars = normalize(&json!("hello"), &schema).unwrap();
        assert_eq!(vars.get("input"), Some(&json!("hello")));
    }

    #[test]
    fn test_non_object_non_string_rejected() {
        let err = normalize(&json!(42), &prompt_schema()).unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate(&json!({}), &prompt_schema()).unwrap_err();
        assert_eq!(err.path, "$.prompt");
        assert!(err.message.contains("required"));
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let err = validate(&json!({"prompt": 7}), &prompt_schema()).unwrap_err();
        assert_eq!(err.path, "$.prompt");
        assert!(err.message.contains("expected string"));
    }

    #[test]
    fn test_max_length_enforced() {
        let schema = json!({"type": "string", "maxLength": 3});
        assert!(validate(&json!("abc"), &schema).is_ok());
        assert!(validate(&json!("abcd"), &schema).is_err());
    }

    #[test]
    fn test_enum_enforced() {
        let schema = json!({"type": "string", "enum": ["fast", "slow"]});
        assert!(validate(&json!("fast"), &schema).is_ok());
        assert!(validate(&json!("medium"), &schema).is_err());
    }

    #[test]
    fn test_additional_properties_rejected() {
        let err = validate(&json!({"prompt": "hi", "extra": 1}), &prompt_schema()).unwrap_err();
        assert_eq!(err.path, "$.extra");
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate(&json!({"prompt": "summarize this"}), &prompt_schema()).is_ok());
    }
}
