//! Runtime configuration.
//!
//! ```yaml
//! generation_timeout: 2m
//! max_concurrent_runs: 2
//! selection:
//!   max_iterations: 500
//!   lexicographic_refinement: true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use sortition_core::{ConfigError, SelectionConfig};

/// Configuration for [`crate::SortitionRuntime`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine tuning shared by every run
    pub selection: SelectionConfig,

    /// Deadline for one portfolio generation, e.g. "90s" or "5m"
    #[serde(with = "humantime_duration")]
    pub generation_timeout: Duration,

    /// Generations allowed to run at the same time
    pub max_concurrent_runs: usize,
}

mod humantime_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            generation_timeout: Duration::from_secs(300),
            max_concurrent_runs: 4,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "generation_timeout must be positive".to_string(),
            ));
        }
        if self.selection.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "selection.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Selection settings for one run.
    ///
    /// The generation timeout doubles as the selector's wall-clock budget
    /// unless the selection config sets a tighter one.
    pub fn selection_config(&self) -> SelectionConfig {
        match self.selection.time_budget() {
            Some(budget) if budget <= self.generation_timeout => self.selection.clone(),
            _ => self.selection.clone().with_time_budget(self.generation_timeout),
        }
    }
}
