//! Parameter and output schema enforcement (spec §4.6).
//!
//! Thin wrapper around `jsonschema` that turns its validation errors into a
//! flat, serializable list the API layer can hand back to clients verbatim.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    pub schema_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid JSON schema: {0}")]
    InvalidSchema(String),
    #[error("instance does not conform to schema")]
    Invalid(Vec<ValidationError>),
}

/// Confirm `schema` is itself a syntactically valid JSON Schema document,
/// without checking it against any instance. Used at blueprint-creation time
/// so a malformed `parameters_schema`/`output_schema` is rejected up front
/// rather than at first use.
pub fn validate_schema(schema: &serde_json::Value) -> Result<(), SchemaError> {
    jsonschema::validator_for(schema)
        .map(|_| ())
        .map_err(|e| SchemaError::InvalidSchema(e.to_string()))
}

/// Validate `instance` against `schema`, returning every violation rather
/// than stopping at the first one so callers can surface a complete report.
pub fn validate(schema: &serde_json::Value, instance: &serde_json::Value) -> Result<(), SchemaError> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;

    let errors: Vec<ValidationError> = compiled
        .iter_errors(instance)
        .map(|e| ValidationError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
            schema_path: e.schema_path.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Invalid(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_conforming_instance() {
        let schema = json!({"type": "object", "required": ["prompt"], "properties": {"prompt": {"type": "string"}}});
        let instance = json!({"prompt": "hello"});
        assert!(validate(&schema, &instance).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = json!({"type": "object", "required": ["prompt"]});
        let instance = json!({});
        let err = validate(&schema, &instance).unwrap_err();
        match err {
            SchemaError::Invalid(errors) => assert!(!errors.is_empty()),
            _ => panic!("expected Invalid"),
        }
    }

    #[test]
    fn reports_every_violation() {
        let schema = json!({
            "type": "object",
            "required": ["answer", "rationale"],
            "properties": {
                "answer": {"type": "string"},
                "rationale": {"type": "string"}
            }
        });
        let instance = json!({});
        let err = validate(&schema, &instance).unwrap_err();
        match err {
            SchemaError::Invalid(errors) => assert!(errors.len() >= 1),
            _ => panic!("expected Invalid"),
        }
    }
}
