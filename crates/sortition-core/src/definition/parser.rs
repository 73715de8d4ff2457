//! Sortition definition parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_definition_schema;
use crate::source::{SortitionSource, SourceError};
use crate::types::{SortitionId, Stratum, Volunteer};

/// Errors that can occur when parsing definitions.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read definition file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Definition does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Definition validation failed: {0}")]
    ValidationError(String),
}

/// A self-contained description of a sortition: pool, strata and panel size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortitionDefinition {
    pub sortition_id: SortitionId,

    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Seats on the panel (k)
    pub panel_size: usize,

    #[serde(default)]
    pub strata: Vec<Stratum>,

    #[serde(default)]
    pub volunteers: Vec<Volunteer>,
}

impl SortitionDefinition {
    /// Parse a definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a definition from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a definition from a file, choosing the format by extension.
    ///
    /// `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, DefinitionError> {
        validate_definition_schema(&value).map_err(DefinitionError::SchemaError)?;
        let definition: SortitionDefinition = serde_json::from_value(value)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Semantic checks the schema cannot express.
    fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::ValidationError(
                "name must not be blank".to_string(),
            ));
        }

        let mut stratum_ids = HashSet::new();
        let mut category_ids = HashSet::new();
        for stratum in &self.strata {
            if !stratum_ids.insert(stratum.id) {
                return Err(DefinitionError::ValidationError(format!(
                    "Duplicate stratum ID: {}",
                    stratum.id
                )));
            }
            for category in &stratum.categories {
                if !category_ids.insert(category.id) {
                    return Err(DefinitionError::ValidationError(format!(
                        "Duplicate category ID: {}",
                        category.id
                    )));
                }
            }
        }

        let mut volunteer_ids = HashSet::new();
        for volunteer in &self.volunteers {
            if !volunteer_ids.insert(volunteer.id) {
                return Err(DefinitionError::ValidationError(format!(
                    "Duplicate volunteer ID: {}",
                    volunteer.id
                )));
            }
            if let Some(unknown) = volunteer
                .categories
                .iter()
                .find(|c| !category_ids.contains(*c))
            {
                return Err(DefinitionError::ValidationError(format!(
                    "Volunteer {} references unknown category {}",
                    volunteer.id, unknown
                )));
            }
        }

        Ok(())
    }
}

impl SortitionSource for SortitionDefinition {
    fn sortition_id(&self) -> SortitionId {
        self.sortition_id
    }

    fn panel_size(&self) -> usize {
        self.panel_size
    }

    fn volunteers(&self) -> Result<Vec<Volunteer>, SourceError> {
        Ok(self.volunteers.clone())
    }

    fn strata(&self) -> Result<Vec<Stratum>, SourceError> {
        Ok(self.strata.clone())
    }
}
