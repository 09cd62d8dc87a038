//! Argument validation against a tool's JSON Schema.
//!
//! Schemas are compiled with `jsonschema` when a tool is registered, so
//! nested objects, arrays, and combinators are checked the same way a
//! remote MCP server would check them.

use jsonschema::Validator;
use serde_json::{Map, Value, json};

/// An object schema with no declared properties.
pub fn empty_object() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Compile `schema` into a reusable validator.
pub fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::validator_for(schema).map_err(|e| format!("invalid parameter schema: {e}"))
}

/// Check `args` against a compiled schema. `null` stands for no
/// arguments and is checked as an empty object.
pub fn check(validator: &Validator, args: &Value) -> Result<(), String> {
    let empty = Value::Object(Map::new());
    let args = if args.is_null() { &empty } else { args };
    validator.validate(args).map_err(|e| e.to_string())
}

/// Compile and check in one go.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    check(&compile(schema)?, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": ["integer", "null"] },
                "mode": { "type": "string", "enum": ["fast", "deep"] }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let schema = search_schema();
        assert!(validate(&schema, &json!({ "query": "rust", "limit": 3 })).is_ok());
        assert!(validate(&schema, &json!({ "query": "rust", "limit": null })).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate(&search_schema(), &json!({})).unwrap_err();
        assert!(err.contains("query"), "{err}");
    }

    #[test]
    fn rejects_wrong_type_and_enum() {
        let schema = search_schema();
        assert!(validate(&schema, &json!({ "query": 1 })).is_err());
        assert!(validate(&schema, &json!({ "query": "a", "limit": 1.5 })).is_err());
        assert!(validate(&schema, &json!({ "query": "a", "mode": "slow" })).is_err());
    }

    #[test]
    fn rejects_unknown_fields_when_closed() {
        let err = validate(&search_schema(), &json!({ "query": "a", "x": 1 })).unwrap_err();
        assert!(err.contains("'x'"), "{err}");
        assert!(validate(&empty_object(), &json!({ "x": 1 })).is_ok());
    }

    #[test]
    fn checks_nested_objects_and_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": { "limit": { "type": "integer" } },
                    "required": ["limit"]
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        });
        assert!(validate(&schema, &json!({ "filter": { "limit": 2 }, "tags": ["a"] })).is_ok());

        let err = validate(&schema, &json!({ "filter": {} })).unwrap_err();
        assert!(err.contains("limit"), "{err}");
        assert!(validate(&schema, &json!({ "tags": [1, 2] })).is_err());
    }

    #[test]
    fn null_is_an_empty_object() {
        assert!(validate(&empty_object(), &Value::Null).is_ok());
        assert!(validate(&search_schema(), &Value::Null).is_err());
        assert!(validate(&empty_object(), &json!([1])).is_err());
    }

    #[test]
    fn invalid_schema_is_reported() {
        let err = compile(&json!({ "type": "not-a-type" })).unwrap_err();
        assert!(err.starts_with("invalid parameter schema"), "{err}");
    }
}
