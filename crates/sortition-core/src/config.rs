//! Engine configuration.
//!
//! Every field has a default; a YAML file only lists what it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::solver::BackendKind;

/// Maximum number of column generation rounds.
pub const MAX_ITERATIONS: usize = 1000;

/// Minimum objective an improving panel must reach to be accepted.
pub const CONVERGENCE_THRESHOLD: f64 = 1e-6;

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How volunteers without any category membership are treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    /// Report them as a warning; the run may proceed
    #[default]
    Warn,

    /// Treat them as a feasibility error
    Reject,
}

/// Tuning for a selection run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub max_iterations: usize,

    pub convergence_threshold: f64,

    /// Wall-clock budget for the whole column generation loop
    pub time_budget_ms: Option<u64>,

    /// Refine the final distribution lexicographically instead of stopping at max-min
    pub lexicographic_refinement: bool,

    pub backend: BackendKind,

    pub coverage_policy: CoveragePolicy,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            convergence_threshold: CONVERGENCE_THRESHOLD,
            time_budget_ms: None,
            lexicographic_refinement: false,
            backend: BackendKind::default(),
            coverage_policy: CoveragePolicy::default(),
        }
    }
}

impl SelectionConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SelectionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }

    /// Set the wall-clock budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget_ms = Some(u64::try_from(budget.as_millis()).unwrap_or(u64::MAX));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "convergence_threshold must be a non-negative number, got {}",
                self.convergence_threshold
            )));
        }
        Ok(())
    }
}
