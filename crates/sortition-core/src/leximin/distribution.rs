//! The master problem: a probability distribution over the current panels.
//!
//! Column generation solves a single max-min LP per round:
//!
//! ```text
//! maximize  z
//! s.t.      Σ_p λ_p = 1,   λ_p ≥ 0
//!           Σ_{p ∋ i} λ_p ≥ z        for every volunteer i in some panel
//! ```
//!
//! [`DistributionSolver::compute_refined`] continues from there to the full
//! lexicographic optimum: it fixes the volunteers whose probability cannot be
//! raised any further and maximizes the minimum of the rest, until everyone is
//! fixed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::Snapshot;
use crate::solver::{Comparison, LinearProgram, SolveOutcome, Solver, SolverError, VarId};
use crate::types::{Panel, VolunteerId};

/// Numerical-stability epsilon for normalization and dual prices.
pub const EPSILON: f64 = 1e-9;

/// Slack on the probability floors imposed during lexicographic refinement.
const REFINEMENT_TOLERANCE: f64 = 1e-7;

/// A volunteer who cannot be raised above the current minimum by more than
/// this is stuck.
const RAISE_MARGIN: f64 = 1e-5;

/// Result of solving the master problem.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution {
    /// One probability per panel, in panel order
    pub probabilities: Vec<f64>,

    /// Per-volunteer prices for the next pricing round
    pub dual_prices: BTreeMap<VolunteerId, f64>,

    /// The LP was not proven optimal and a uniform distribution was used instead
    pub degraded: bool,
}

/// Marginal selection probability of every volunteer appearing in some panel.
pub fn selection_probabilities(panels: &[Panel], probabilities: &[f64]) -> BTreeMap<VolunteerId, f64> {
    let mut marginals = BTreeMap::new();
    for (panel, probability) in panels.iter().zip(probabilities) {
        for &id in panel.members() {
            *marginals.entry(id).or_insert(0.0) += probability;
        }
    }
    marginals
}

/// Solves the master problem over a snapshot's pool.
pub struct DistributionSolver<'a> {
    snapshot: &'a Snapshot,
    solver: Arc<dyn Solver>,
}

impl<'a> DistributionSolver<'a> {
    pub fn new(snapshot: &'a Snapshot, solver: Arc<dyn Solver>) -> Self {
        Self { snapshot, solver }
    }

    /// Max-min distribution plus heuristic dual prices.
    ///
    /// A solve that does not prove optimality degrades to a uniform
    /// distribution; only backend failures are returned as errors.
    pub fn compute(&self, panels: &[Panel]) -> Result<Distribution, SolverError> {
        if panels.is_empty() {
            return Ok(Distribution::default());
        }

        let incidence = self.incidence(panels);
        let (probabilities, degraded) = if panels.len() == 1 {
            (vec![1.0], false)
        } else {
            match self.max_min(panels.len(), &incidence, &BTreeMap::new())? {
                Some((probabilities, _)) => (probabilities, false),
                None => {
                    tracing::warn!(
                        sortition = self.snapshot.sortition_id(),
                        panels = panels.len(),
                        "Distribution LP not proven optimal, falling back to uniform"
                    );
                    (uniform(panels.len()), true)
                }
            }
        };

        let dual_prices = self.dual_prices(&probabilities, &incidence);
        Ok(Distribution {
            probabilities,
            dual_prices,
            degraded,
        })
    }

    /// Lexicographically optimal distribution.
    ///
    /// Starts from [`DistributionSolver::compute`] and stops at the first
    /// solve that is not proven optimal, keeping the best distribution found
    /// so far.
    pub fn compute_refined(&self, panels: &[Panel]) -> Result<Distribution, SolverError> {
        let mut distribution = self.compute(panels)?;
        if panels.len() < 2 || distribution.degraded {
            return Ok(distribution);
        }

        let incidence = self.incidence(panels);
        let covered: BTreeSet<VolunteerId> = incidence
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(&id, _)| id)
            .collect();

        let mut fixed: BTreeMap<VolunteerId, f64> = BTreeMap::new();
        let mut rounds = 0usize;

        while fixed.len() < covered.len() {
            rounds += 1;
            let Some((probabilities, z)) = self.max_min(panels.len(), &incidence, &fixed)? else {
                tracing::debug!(rounds, "Refinement stopped: max-min not optimal");
                break;
            };
            distribution.probabilities = probabilities;

            let at_min: Vec<VolunteerId> = covered
                .iter()
                .filter(|id| !fixed.contains_key(id))
                .filter(|id| {
                    marginal(&incidence[*id], &distribution.probabilities) <= z + REFINEMENT_TOLERANCE
                })
                .copied()
                .collect();

            let mut stuck = Vec::new();
            for &id in &at_min {
                match self.best_reachable(panels.len(), &incidence, &fixed, z, id)? {
                    Some(best) if best <= z + RAISE_MARGIN => stuck.push(id),
                    Some(_) => {}
                    None => {
                        tracing::debug!(rounds, volunteer = id, "Refinement stopped: raise not optimal");
                        distribution.dual_prices =
                            self.dual_prices(&distribution.probabilities, &incidence);
                        return Ok(distribution);
                    }
                }
            }

            let newly_fixed = match (stuck.is_empty(), at_min.is_empty()) {
                (false, _) => stuck,
                (true, false) => at_min,
                (true, true) => covered
                    .iter()
                    .filter(|id| !fixed.contains_key(id))
                    .copied()
                    .collect(),
            };
            for id in newly_fixed {
                fixed.insert(id, z);
            }
        }

        tracing::debug!(rounds, fixed = fixed.len(), "Lexicographic refinement finished");
        distribution.dual_prices = self.dual_prices(&distribution.probabilities, &incidence);
        Ok(distribution)
    }

    /// Panel indices per pool volunteer.
    fn incidence(&self, panels: &[Panel]) -> BTreeMap<VolunteerId, Vec<usize>> {
        let mut incidence: BTreeMap<VolunteerId, Vec<usize>> = self
            .snapshot
            .volunteer_ids()
            .iter()
            .map(|&id| (id, Vec::new()))
            .collect();

        for (index, panel) in panels.iter().enumerate() {
            for id in panel.members() {
                if let Some(indices) = incidence.get_mut(id) {
                    indices.push(index);
                }
            }
        }
        incidence
    }

    /// Panel variables with `Σ λ = 1`, plus the floors of already fixed volunteers.
    fn base_program(
        &self,
        num_panels: usize,
        incidence: &BTreeMap<VolunteerId, Vec<usize>>,
        fixed: &BTreeMap<VolunteerId, f64>,
    ) -> (LinearProgram, Vec<VarId>) {
        let mut program = LinearProgram::new();
        let lambdas: Vec<VarId> = (0..num_panels)
            .map(|_| program.continuous_var(Some(0.0), None))
            .collect();

        program.constrain(
            lambdas.iter().map(|&v| (v, 1.0)).collect(),
            Comparison::Equal,
            1.0,
        );

        for (id, &floor) in fixed {
            let terms = incidence[id].iter().map(|&p| (lambdas[p], 1.0)).collect();
            program.constrain(
                terms,
                Comparison::GreaterOrEqual,
                (floor - REFINEMENT_TOLERANCE).max(0.0),
            );
        }

        (program, lambdas)
    }

    /// Maximize the minimum probability over covered, not yet fixed volunteers.
    ///
    /// `Ok(None)` when the solve is not proven optimal.
    fn max_min(
        &self,
        num_panels: usize,
        incidence: &BTreeMap<VolunteerId, Vec<usize>>,
        fixed: &BTreeMap<VolunteerId, f64>,
    ) -> Result<Option<(Vec<f64>, f64)>, SolverError> {
        let (mut program, lambdas) = self.base_program(num_panels, incidence, fixed);
        let z = program.continuous_var(Some(0.0), Some(1.0));

        for (id, indices) in incidence {
            if indices.is_empty() || fixed.contains_key(id) {
                continue;
            }
            let mut terms: Vec<(VarId, f64)> = indices.iter().map(|&p| (lambdas[p], 1.0)).collect();
            terms.push((z, -1.0));
            program.constrain(terms, Comparison::GreaterOrEqual, 0.0);
        }
        program.maximize(vec![(z, 1.0)]);

        match self.solver.solve(&program)? {
            SolveOutcome::Optimal { values, objective } => {
                let probabilities = normalize(&values[..num_panels]);
                Ok(Some((probabilities, objective)))
            }
            SolveOutcome::Infeasible | SolveOutcome::Unproven(_) => Ok(None),
        }
    }

    /// Highest probability `target` can reach while every other unfixed
    /// volunteer stays at or above `floor`.
    fn best_reachable(
        &self,
        num_panels: usize,
        incidence: &BTreeMap<VolunteerId, Vec<usize>>,
        fixed: &BTreeMap<VolunteerId, f64>,
        floor: f64,
        target: VolunteerId,
    ) -> Result<Option<f64>, SolverError> {
        let (mut program, lambdas) = self.base_program(num_panels, incidence, fixed);

        for (id, indices) in incidence {
            if indices.is_empty() || fixed.contains_key(id) || *id == target {
                continue;
            }
            let terms = indices.iter().map(|&p| (lambdas[p], 1.0)).collect();
            program.constrain(
                terms,
                Comparison::GreaterOrEqual,
                (floor - REFINEMENT_TOLERANCE).max(0.0),
            );
        }
        program.maximize(incidence[&target].iter().map(|&p| (lambdas[p], 1.0)).collect());

        match self.solver.solve(&program)? {
            SolveOutcome::Optimal { objective, .. } => Ok(Some(objective)),
            SolveOutcome::Infeasible | SolveOutcome::Unproven(_) => Ok(None),
        }
    }

    /// Heuristic prices favouring under-represented volunteers.
    ///
    /// Volunteers at the current minimum get 1.0, volunteers already certain
    /// to be selected get 0, everyone else `(1 - π_i) / (1 - min + ε)`.
    fn dual_prices(
        &self,
        probabilities: &[f64],
        incidence: &BTreeMap<VolunteerId, Vec<usize>>,
    ) -> BTreeMap<VolunteerId, f64> {
        let current: BTreeMap<VolunteerId, f64> = incidence
            .iter()
            .map(|(&id, indices)| (id, marginal(indices, probabilities)))
            .collect();

        let min = current.values().copied().fold(f64::INFINITY, f64::min);
        let min = if min.is_finite() { min } else { 0.0 };

        current
            .into_iter()
            .map(|(id, pi)| {
                let price = if pi <= min + EPSILON {
                    1.0
                } else if pi < 1.0 {
                    (1.0 - pi) / (1.0 - min + EPSILON)
                } else {
                    0.0
                };
                (id, price)
            })
            .collect()
    }
}

fn marginal(indices: &[usize], probabilities: &[f64]) -> f64 {
    indices
        .iter()
        .map(|&p| probabilities.get(p).copied().unwrap_or(0.0))
        .sum()
}

fn uniform(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// Clamp negatives to zero and rescale to sum to one.
fn normalize(raw: &[f64]) -> Vec<f64> {
    let clamped: Vec<f64> = raw.iter().map(|&p| p.max(0.0)).collect();
    let total: f64 = clamped.iter().sum();
    if total > EPSILON {
        clamped.iter().map(|p| p / total).collect()
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SortitionDefinition;
    use crate::leximin::ConstraintBuilder;
    use crate::solver::SolveOutcome;
    use crate::types::{Category, Stratum, Volunteer};

    fn snapshot(pool: u64) -> Snapshot {
        let definition = SortitionDefinition {
            sortition_id: 9,
            name: "Test".to_string(),
            description: None,
            panel_size: 2,
            strata: vec![Stratum::new(1, "All", vec![Category::new(10, "Everyone", None)])],
            volunteers: (1..=pool).map(|i| Volunteer::new(i, [10])).collect(),
        };
        ConstraintBuilder::build(&definition).unwrap()
    }

    struct GiveUp;

    impl Solver for GiveUp {
        fn name(&self) -> &'static str {
            "give-up"
        }

        fn solve(&self, _program: &LinearProgram) -> Result<SolveOutcome, SolverError> {
            Ok(SolveOutcome::Unproven("iteration limit".to_string()))
        }
    }

    #[test]
    fn test_empty_panels() {
        let snapshot = snapshot(3);
        let result = DistributionSolver::new(&snapshot, Arc::new(GiveUp))
            .compute(&[])
            .unwrap();
        assert!(result.probabilities.is_empty());
        assert!(result.dual_prices.is_empty());
    }

    #[test]
    fn test_single_panel_skips_lp() {
        let snapshot = snapshot(3);
        let result = DistributionSolver::new(&snapshot, Arc::new(GiveUp))
            .compute(&[Panel::new([1, 2])])
            .unwrap();
        assert_eq!(result.probabilities, vec![1.0]);
        assert!(!result.degraded);
        // 3 is in no panel and sits at the minimum
        assert_eq!(result.dual_prices[&3], 1.0);
        assert_eq!(result.dual_prices[&1], 0.0);
    }

    #[test]
    fn test_unproven_falls_back_to_uniform() {
        let snapshot = snapshot(4);
        let panels = [Panel::new([1, 2]), Panel::new([3, 4])];
        let result = DistributionSolver::new(&snapshot, Arc::new(GiveUp))
            .compute(&panels)
            .unwrap();
        assert!(result.degraded);
        assert_eq!(result.probabilities, vec![0.5, 0.5]);
    }

    #[test]
    fn test_selection_probabilities_sum_over_panels() {
        let panels = [Panel::new([1, 2]), Panel::new([2, 3])];
        let marginals = selection_probabilities(&panels, &[0.25, 0.75]);
        assert_eq!(marginals[&1], 0.25);
        assert_eq!(marginals[&2], 1.0);
        assert_eq!(marginals[&3], 0.75);
        assert!(!marginals.contains_key(&4));
    }

    #[cfg(feature = "microlp")]
    mod with_backend {
        use super::*;
        use crate::solver::MicroLpSolver;

        fn solver(snapshot: &Snapshot) -> DistributionSolver<'_> {
            DistributionSolver::new(snapshot, Arc::new(MicroLpSolver::new()))
        }

        #[test]
        fn test_max_min_balances_disjoint_panels() {
            let snapshot = snapshot(4);
            let panels = [Panel::new([1, 2]), Panel::new([3, 4])];
            let result = solver(&snapshot).compute(&panels).unwrap();
            assert!(!result.degraded);
            assert!((result.probabilities[0] - 0.5).abs() < 1e-6);
            assert!((result.probabilities[1] - 0.5).abs() < 1e-6);
            let total: f64 = result.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }

        #[test]
        fn test_triangle_reaches_two_thirds() {
            let snapshot = snapshot(3);
            let panels = [Panel::new([1, 2]), Panel::new([1, 3]), Panel::new([2, 3])];
            let result = solver(&snapshot).compute(&panels).unwrap();
            let marginals = selection_probabilities(&panels, &result.probabilities);
            for id in 1..=3 {
                assert!((marginals[&id] - 2.0 / 3.0).abs() < 1e-6);
            }
        }

        #[test]
        fn test_refinement_raises_non_minimal_volunteers() {
            // 2 and 3 cannot both exceed 1/2; volunteer 1 can still reach 1
            let snapshot = snapshot(3);
            let panels = [Panel::new([1, 2]), Panel::new([3]), Panel::new([1, 3])];
            let result = solver(&snapshot).compute_refined(&panels).unwrap();
            let marginals = selection_probabilities(&panels, &result.probabilities);
            assert!((marginals[&2] - 0.5).abs() < 1e-5);
            assert!((marginals[&3] - 0.5).abs() < 1e-5);
            assert!((marginals[&1] - 1.0).abs() < 1e-5);
        }

        #[test]
        fn test_refinement_never_lowers_the_minimum() {
            let snapshot = snapshot(5);
            let panels = [
                Panel::new([1, 2]),
                Panel::new([2, 3]),
                Panel::new([3, 4]),
                Panel::new([4, 5]),
                Panel::new([1, 5]),
                Panel::new([1, 3]),
            ];
            let plain = solver(&snapshot).compute(&panels).unwrap();
            let refined = solver(&snapshot).compute_refined(&panels).unwrap();

            let min_of = |probabilities: &[f64]| {
                selection_probabilities(&panels, probabilities)
                    .values()
                    .copied()
                    .fold(f64::INFINITY, f64::min)
            };
            assert!(min_of(&refined.probabilities) >= min_of(&plain.probabilities) - 1e-6);
            let total: f64 = refined.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }
}
