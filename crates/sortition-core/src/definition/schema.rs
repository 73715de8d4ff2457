//! JSON Schema validation for sortition definitions.
//!
//! Definitions are validated against schema/sortition.schema.json before
//! they are deserialized, so structural mistakes are reported with their
//! location instead of as a bare serde error.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded definition schema (loaded at compile time).
const DEFINITION_SCHEMA_JSON: &str = include_str!("../../../../schema/sortition.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(DEFINITION_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a definition JSON value against the schema.
///
/// Returns every violation found, each suffixed with its instance path.
pub fn validate_definition_schema(definition: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(definition)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "sortition_id": 1,
            "name": "Climate assembly",
            "panel_size": 2,
            "strata": [
                {
                    "id": 10,
                    "name": "Gender",
                    "categories": [
                        { "id": 100, "name": "Women", "max_quota_percentage": 50 },
                        { "id": 101, "name": "Men", "max_quota_percentage": 50 }
                    ]
                }
            ],
            "volunteers": [
                { "id": 1, "categories": [100] },
                { "id": 2, "categories": [101] }
            ]
        })
    }

    #[test]
    fn test_valid_definition_passes_schema() {
        assert!(validate_definition_schema(&minimal()).is_ok());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let value = serde_json::json!({ "sortition_id": 1, "name": "Only a name" });
        let errors = validate_definition_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_percentage_above_hundred_fails() {
        let mut value = minimal();
        value["strata"][0]["categories"][0]["max_quota_percentage"] = serde_json::json!(120);
        assert!(validate_definition_schema(&value).is_err());
    }

    #[test]
    fn test_negative_volunteer_id_fails() {
        let mut value = minimal();
        value["volunteers"][0]["id"] = serde_json::json!(-4);
        assert!(validate_definition_schema(&value).is_err());
    }

    #[test]
    fn test_additional_properties_fail() {
        let mut value = minimal();
        value["unknown_field"] = serde_json::json!("should fail");
        assert!(validate_definition_schema(&value).is_err());
    }
}
