//! Panel generation: the ILP pricing subproblem.
//!
//! One binary variable per volunteer, exactly `k` of them set, and every
//! category's seat count kept within its quota. Without prices any feasible
//! panel will do; with prices the panel maximizing `Σ π_i x_i` is returned,
//! provided that objective clears the convergence threshold.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Snapshot;
use crate::config::CONVERGENCE_THRESHOLD;
use crate::solver::{Comparison, LinearProgram, SolveOutcome, Solver, SolverError, VarId};
use crate::types::{Panel, VolunteerId};

/// Binary values above this are read as "selected".
const SELECTED_CUTOFF: f64 = 0.5;

/// Finds feasible or improving panels for a snapshot.
pub struct PanelGenerator<'a> {
    snapshot: &'a Snapshot,
    solver: Arc<dyn Solver>,
    convergence_threshold: f64,
}

impl<'a> PanelGenerator<'a> {
    pub fn new(snapshot: &'a Snapshot, solver: Arc<dyn Solver>) -> Self {
        Self {
            snapshot,
            solver,
            convergence_threshold: CONVERGENCE_THRESHOLD,
        }
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    /// Find any panel satisfying all quotas.
    ///
    /// `Ok(None)` means no such panel exists.
    pub fn find_feasible_panel(&self) -> Result<Option<Panel>, SolverError> {
        self.solve_panel(None)
    }

    /// Find the panel with the highest total dual price.
    ///
    /// Returns `Ok(None)` when the best achievable objective does not exceed
    /// the convergence threshold, i.e. no improving column exists. An empty
    /// price map falls back to [`PanelGenerator::find_feasible_panel`].
    pub fn find_improving_panel(
        &self,
        dual_prices: &BTreeMap<VolunteerId, f64>,
    ) -> Result<Option<Panel>, SolverError> {
        if dual_prices.is_empty() {
            return self.find_feasible_panel();
        }
        self.solve_panel(Some(dual_prices))
    }

    fn solve_panel(
        &self,
        dual_prices: Option<&BTreeMap<VolunteerId, f64>>,
    ) -> Result<Option<Panel>, SolverError> {
        let volunteers = self.snapshot.volunteer_ids();
        if volunteers.is_empty() {
            return Ok(None);
        }

        let k = self.snapshot.panel_size();
        let mut program = LinearProgram::new();
        let x: Vec<VarId> = volunteers.iter().map(|_| program.binary_var()).collect();

        program.constrain(
            x.iter().map(|&v| (v, 1.0)).collect(),
            Comparison::Equal,
            k as f64,
        );

        for &category in self.snapshot.category_ids() {
            let Some(quota) = self.snapshot.quota(category) else {
                continue;
            };

            let terms: Vec<(VarId, f64)> = self
                .snapshot
                .members_of(category)
                .filter_map(|id| self.snapshot.volunteer_index(id))
                .map(|idx| (x[idx], 1.0))
                .collect();
            if terms.is_empty() {
                continue;
            }

            if quota.min > 0 {
                program.constrain(terms.clone(), Comparison::GreaterOrEqual, quota.min as f64);
            }
            if quota.max < k {
                program.constrain(terms, Comparison::LessOrEqual, quota.max as f64);
            }
        }

        let objective = match dual_prices {
            None => x.iter().map(|&v| (v, 1.0)).collect(),
            Some(prices) => volunteers
                .iter()
                .zip(&x)
                .map(|(id, &v)| (v, prices.get(id).copied().unwrap_or(0.0)))
                .collect(),
        };
        program.maximize(objective);

        match self.solver.solve(&program)? {
            SolveOutcome::Optimal { values, objective } => {
                if dual_prices.is_some() && objective <= self.convergence_threshold {
                    tracing::debug!(objective, "No improving panel above threshold");
                    return Ok(None);
                }

                let selected: Vec<VolunteerId> = volunteers
                    .iter()
                    .zip(&values)
                    .filter(|(_, &value)| value > SELECTED_CUTOFF)
                    .map(|(&id, _)| id)
                    .collect();

                if selected.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Panel::new(selected)))
                }
            }
            SolveOutcome::Infeasible => {
                tracing::debug!(sortition = self.snapshot.sortition_id(), "Panel ILP infeasible");
                Ok(None)
            }
            SolveOutcome::Unproven(reason) => {
                tracing::warn!(
                    sortition = self.snapshot.sortition_id(),
                    solver = self.solver.name(),
                    reason = %reason,
                    "Panel ILP not proven optimal"
                );
                Ok(None)
            }
        }
    }
}
