//! Column generation driver.
//!
//! ```text
//! snapshot ─▶ feasibility gate ─▶ initial panel
//!                                    │
//!            ┌───────────────────────┘
//!            ▼
//!   distribution (LP) ─▶ dual prices ─▶ improving panel (ILP)
//!            ▲                              │ new panel
//!            └──────────────────────────────┘
//! ```
//!
//! The loop stops when no improving panel exists, the generator returns a
//! panel already in the portfolio, the iteration cap is hit, or the time
//! budget runs out.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SelectionConfig;
use crate::guard::GenerationGuard;
use crate::leximin::{
    selection_probabilities, ConstraintBuilder, DistributionSolver, FeasibilityChecker,
    PanelGenerator, Snapshot,
};
use crate::solver::{solver_for, Solver, SolverError};
use crate::source::{SortitionSource, SourceError};
use crate::types::{Panel, VolunteerId};

/// Why a selection run produced no portfolio.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Failed to read sortition data: {0}")]
    Source(#[from] SourceError),

    /// Joined feasibility errors
    #[error("{0}")]
    Infeasible(String),

    #[error("No valid initial panel could be found")]
    NoInitialPanel,

    #[error("LEXIMIN internal error: {0}")]
    Solver(String),

    #[error("Selection run was cancelled")]
    Cancelled,
}

impl From<SolverError> for SelectionError {
    fn from(err: SolverError) -> Self {
        SelectionError::Solver(err.to_string())
    }
}

/// Portfolio produced by a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub panels: Vec<Panel>,

    /// Parallel to `panels`
    pub probabilities: Vec<f64>,

    /// Marginal probability of every volunteer that appears in some panel
    pub selection_probabilities: BTreeMap<VolunteerId, f64>,

    /// Column generation rounds performed
    pub iterations: usize,

    /// The loop ended because no improving panel was left
    pub converged: bool,

    /// Non-blocking feasibility findings
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Runs the LEXIMIN column generation loop.
pub struct LeximinSelector {
    config: SelectionConfig,
    solver: Option<Arc<dyn Solver>>,
    guard: Option<Arc<GenerationGuard>>,
}

impl LeximinSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            solver: None,
            guard: None,
        }
    }

    /// Use a specific backend instead of the configured one.
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Stop between rounds once `guard` is cancelled.
    pub fn with_guard(mut self, guard: Arc<GenerationGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.guard.as_ref().is_some_and(|guard| guard.is_cancelled())
    }

    /// Build a snapshot from `source` and run the selection on it.
    pub fn run(&self, source: &dyn SortitionSource) -> Result<Selection, SelectionError> {
        let snapshot = ConstraintBuilder::build(source)?;
        self.run_snapshot(&snapshot)
    }

    pub fn run_snapshot(&self, snapshot: &Snapshot) -> Result<Selection, SelectionError> {
        let started = Instant::now();

        let report = FeasibilityChecker::new(snapshot)
            .with_coverage_policy(self.config.coverage_policy)
            .check();
        if !report.feasible {
            return Err(SelectionError::Infeasible(report.joined_errors()));
        }
        for warning in &report.warnings {
            tracing::warn!(sortition = snapshot.sortition_id(), "{}", warning);
        }

        let solver = match &self.solver {
            Some(solver) => Arc::clone(solver),
            None => solver_for(self.config.backend)?,
        };

        tracing::info!(
            sortition = snapshot.sortition_id(),
            volunteers = snapshot.num_volunteers(),
            panel_size = snapshot.panel_size(),
            solver = solver.name(),
            "Starting LEXIMIN selection"
        );

        let generator = PanelGenerator::new(snapshot, Arc::clone(&solver))
            .with_convergence_threshold(self.config.convergence_threshold);
        let distribution_solver = DistributionSolver::new(snapshot, solver);

        let initial = generator
            .find_feasible_panel()?
            .ok_or(SelectionError::NoInitialPanel)?;

        let mut known: HashSet<Panel> = HashSet::from([initial.clone()]);
        let mut panels = vec![initial];
        let mut iterations = 0usize;
        let mut converged = false;
        // a budget past the end of time means no deadline
        let deadline = self
            .config
            .time_budget()
            .and_then(|budget| started.checked_add(budget));

        while iterations < self.config.max_iterations {
            if self.cancelled() {
                tracing::info!(sortition = snapshot.sortition_id(), iterations, "Selection cancelled");
                return Err(SelectionError::Cancelled);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::warn!(
                    sortition = snapshot.sortition_id(),
                    iterations,
                    panels = panels.len(),
                    "Time budget exhausted before convergence"
                );
                break;
            }
            iterations += 1;

            let distribution = distribution_solver.compute(&panels)?;
            match generator.find_improving_panel(&distribution.dual_prices)? {
                None => {
                    converged = true;
                    break;
                }
                Some(panel) if known.contains(&panel) => {
                    tracing::debug!(iteration = iterations, "Generator repeated a known panel");
                    converged = true;
                    break;
                }
                Some(panel) => {
                    tracing::debug!(iteration = iterations, panel = %panel, "Added improving panel");
                    known.insert(panel.clone());
                    panels.push(panel);
                }
            }
        }

        if !converged && iterations >= self.config.max_iterations {
            tracing::warn!(
                sortition = snapshot.sortition_id(),
                max_iterations = self.config.max_iterations,
                "Iteration cap reached before convergence"
            );
        }

        let distribution = if self.config.lexicographic_refinement {
            distribution_solver.compute_refined(&panels)?
        } else {
            distribution_solver.compute(&panels)?
        };
        let marginals = selection_probabilities(&panels, &distribution.probabilities);

        tracing::info!(
            sortition = snapshot.sortition_id(),
            panels = panels.len(),
            iterations,
            converged,
            elapsed_ms = elapsed_ms(started.elapsed()),
            "LEXIMIN selection finished"
        );

        Ok(Selection {
            panels,
            probabilities: distribution.probabilities,
            selection_probabilities: marginals,
            iterations,
            converged,
            warnings: report.warnings,
        })
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
