//! Persisted panel portfolio with a write-once sampling transition.
//!
//! A portfolio is created once per sortition from a [`Selection`] and can be
//! published before the draw. Sampling moves it from "generated" to
//! "sampled" exactly once; the selected index, timestamp, seed and raw random
//! value are then fixed for the portfolio's lifetime.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::leximin::{PanelSampler, SampleDraw, SamplingError};
use crate::selector::Selection;
use crate::types::{Panel, SortitionId, VolunteerId};

/// Algorithm name recorded in audit logs.
pub const ALGORITHM: &str = "LEXIMIN";

/// Algorithm version recorded in audit logs.
pub const ALGORITHM_VERSION: &str = "1.0";

/// Allowed deviation of the probability sum from one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
    /// Stored data violates portfolio invariants
    #[error("Invalid portfolio: {0}")]
    Validation(String),

    #[error("Portfolio already sampled")]
    AlreadySampled,

    #[error("Sampling failed: {0}")]
    Sampling(#[from] SamplingError),
}

/// Spread of the per-volunteer selection probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairnessMetrics {
    pub min_probability: f64,
    pub max_probability: f64,
    pub mean_probability: f64,
    pub probability_range: f64,
}

/// Publishable record of how a draw was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub algorithm: String,
    pub version: String,
    pub stratified_sortition_id: SortitionId,
    pub generated_at: DateTime<Utc>,
    pub generation_time_seconds: f64,
    pub num_panels: usize,
    pub num_iterations: usize,
    pub convergence_achieved: bool,
    pub sampled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_panel_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_seed: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_value_used: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_panel_probability: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness_metrics: Option<FairnessMetrics>,
}

/// Serialized layout of a portfolio; validated before it becomes a [`PanelPortfolio`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortfolioRecord {
    sortition_id: SortitionId,
    /// Raw member lists; duplicates must be rejected, not collapsed
    panels: Vec<Vec<VolunteerId>>,
    probabilities: Vec<f64>,
    #[serde(default)]
    selection_probabilities: BTreeMap<VolunteerId, f64>,
    generated_at: DateTime<Utc>,
    generation_time_seconds: f64,
    num_iterations: usize,
    convergence_achieved: bool,
    #[serde(default)]
    selected_panel_index: Option<usize>,
    #[serde(default)]
    selected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    verification_seed: Option<String>,
    #[serde(default)]
    random_value_used: Option<f64>,
}

impl PortfolioRecord {
    fn validate(&self) -> Result<(), PortfolioError> {
        if self.panels.is_empty() {
            return Err(PortfolioError::Validation("panels must not be empty".to_string()));
        }
        if let Some(index) = self.panels.iter().position(Vec::is_empty) {
            return Err(PortfolioError::Validation(format!("panel #{} is empty", index)));
        }
        for (index, members) in self.panels.iter().enumerate() {
            let distinct: BTreeSet<&VolunteerId> = members.iter().collect();
            if distinct.len() != members.len() {
                return Err(PortfolioError::Validation(format!(
                    "panel #{} lists a volunteer more than once",
                    index
                )));
            }
        }
        let size = self.panels[0].len();
        if let Some(index) = self.panels.iter().position(|members| members.len() != size) {
            return Err(PortfolioError::Validation(format!(
                "panel #{} has {} members, expected {}",
                index,
                self.panels[index].len(),
                size
            )));
        }
        if self.probabilities.len() != self.panels.len() {
            return Err(PortfolioError::Validation(format!(
                "probabilities must match the number of panels ({} panels, {} probabilities)",
                self.panels.len(),
                self.probabilities.len()
            )));
        }
        if let Some(p) = self.probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(PortfolioError::Validation(format!(
                "probabilities must be non-negative numbers, got {}",
                p
            )));
        }
        let total: f64 = self.probabilities.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(PortfolioError::Validation(format!(
                "probabilities must sum to 1, got {:.6}",
                total
            )));
        }
        match (self.selected_panel_index, self.selected_at) {
            (Some(index), Some(_)) if index >= self.panels.len() => {
                Err(PortfolioError::Validation(format!(
                    "selected panel index {} out of range",
                    index
                )))
            }
            (Some(_), None) | (None, Some(_)) => Err(PortfolioError::Validation(
                "selected_panel_index and selected_at must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Generated panels, their probabilities and the at-most-once draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PortfolioRecord")]
pub struct PanelPortfolio {
    sortition_id: SortitionId,
    panels: Vec<Panel>,
    probabilities: Vec<f64>,
    selection_probabilities: BTreeMap<VolunteerId, f64>,
    generated_at: DateTime<Utc>,
    generation_time_seconds: f64,
    num_iterations: usize,
    convergence_achieved: bool,
    selected_panel_index: Option<usize>,
    selected_at: Option<DateTime<Utc>>,
    verification_seed: Option<String>,
    random_value_used: Option<f64>,
}

impl TryFrom<PortfolioRecord> for PanelPortfolio {
    type Error = PortfolioError;

    fn try_from(record: PortfolioRecord) -> Result<Self, Self::Error> {
        record.validate()?;
        Ok(Self {
            sortition_id: record.sortition_id,
            panels: record.panels.into_iter().map(Panel::new).collect(),
            probabilities: record.probabilities,
            selection_probabilities: record.selection_probabilities,
            generated_at: record.generated_at,
            generation_time_seconds: record.generation_time_seconds,
            num_iterations: record.num_iterations,
            convergence_achieved: record.convergence_achieved,
            selected_panel_index: record.selected_panel_index,
            selected_at: record.selected_at,
            verification_seed: record.verification_seed,
            random_value_used: record.random_value_used,
        })
    }
}

impl PanelPortfolio {
    /// Create an unsampled portfolio from a selection run.
    pub fn new(
        sortition_id: SortitionId,
        selection: Selection,
        generation_time: Duration,
    ) -> Result<Self, PortfolioError> {
        PortfolioRecord {
            sortition_id,
            panels: selection.panels.into_iter().map(Vec::from).collect(),
            probabilities: selection.probabilities,
            selection_probabilities: selection.selection_probabilities,
            generated_at: Utc::now(),
            generation_time_seconds: generation_time.as_secs_f64(),
            num_iterations: selection.iterations,
            convergence_achieved: selection.converged,
            selected_panel_index: None,
            selected_at: None,
            verification_seed: None,
            random_value_used: None,
        }
        .try_into()
    }

    /// Parse and validate a JSON record.
    pub fn from_json(json: &str) -> Result<Self, PortfolioError> {
        serde_json::from_str(json).map_err(|e| PortfolioError::Validation(e.to_string()))
    }

    /// Draw the panel and record the outcome.
    ///
    /// Fails with [`PortfolioError::AlreadySampled`] on every call after the
    /// first successful one.
    pub fn sample(&mut self, seed: Option<&str>) -> Result<SampleDraw, PortfolioError> {
        if self.sampled() {
            return Err(PortfolioError::AlreadySampled);
        }

        let draw = self.sampler(seed).sample()?;
        self.selected_panel_index = Some(draw.selected_index);
        self.selected_at = Some(Utc::now());
        self.verification_seed = seed.map(str::to_string);
        self.random_value_used = Some(draw.random_value);

        tracing::info!(
            sortition = self.sortition_id,
            selected_index = draw.selected_index,
            seeded = seed.is_some(),
            "Portfolio sampled"
        );
        Ok(draw)
    }

    /// Repeat a seeded draw without recording anything.
    pub fn replay(&self, seed: &str) -> Result<SampleDraw, PortfolioError> {
        Ok(self.sampler(Some(seed)).sample()?)
    }

    fn sampler(&self, seed: Option<&str>) -> PanelSampler {
        let sampler = PanelSampler::new(self.panels.clone(), &self.probabilities);
        match seed {
            Some(seed) => sampler.with_verification_seed(seed),
            None => sampler,
        }
    }

    pub fn sortition_id(&self) -> SortitionId {
        self.sortition_id
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn selection_probabilities(&self) -> &BTreeMap<VolunteerId, f64> {
        &self.selection_probabilities
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn generation_time_seconds(&self) -> f64 {
        self.generation_time_seconds
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn convergence_achieved(&self) -> bool {
        self.convergence_achieved
    }

    pub fn selected_panel_index(&self) -> Option<usize> {
        self.selected_panel_index
    }

    pub fn selected_at(&self) -> Option<DateTime<Utc>> {
        self.selected_at
    }

    pub fn verification_seed(&self) -> Option<&str> {
        self.verification_seed.as_deref()
    }

    pub fn random_value_used(&self) -> Option<f64> {
        self.random_value_used
    }

    pub fn num_panels(&self) -> usize {
        self.panels.len()
    }

    pub fn sampled(&self) -> bool {
        self.selected_at.is_some()
    }

    pub fn selected_panel(&self) -> Option<&Panel> {
        self.selected_panel_index
            .filter(|_| self.sampled())
            .and_then(|index| self.panels.get(index))
    }

    pub fn selected_panel_probability(&self) -> Option<f64> {
        self.selected_panel_index
            .filter(|_| self.sampled())
            .and_then(|index| self.probabilities.get(index).copied())
    }

    /// Ids on the selected panel; empty until sampled.
    pub fn selected_participant_ids(&self) -> Vec<VolunteerId> {
        self.selected_panel()
            .map(|panel| panel.members().to_vec())
            .unwrap_or_default()
    }

    /// `None` when no selection probabilities were recorded.
    pub fn fairness_metrics(&self) -> Option<FairnessMetrics> {
        if self.selection_probabilities.is_empty() {
            return None;
        }

        let values = self.selection_probabilities.values().copied();
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.sum::<f64>() / self.selection_probabilities.len() as f64;

        Some(FairnessMetrics {
            min_probability: min,
            max_probability: max,
            mean_probability: mean,
            probability_range: max - min,
        })
    }

    pub fn audit_log(&self) -> AuditLog {
        let sampled = self.sampled();
        AuditLog {
            algorithm: ALGORITHM.to_string(),
            version: ALGORITHM_VERSION.to_string(),
            stratified_sortition_id: self.sortition_id,
            generated_at: self.generated_at,
            generation_time_seconds: self.generation_time_seconds,
            num_panels: self.num_panels(),
            num_iterations: self.num_iterations,
            convergence_achieved: self.convergence_achieved,
            sampled,
            selected_at: self.selected_at,
            selected_panel_index: self.selected_panel_index,
            verification_seed: self.verification_seed.clone(),
            random_value_used: self.random_value_used,
            selected_panel_probability: self.selected_panel_probability(),
            fairness_metrics: if sampled { self.fairness_metrics() } else { None },
        }
    }
}
