//! Pluggable LP/ILP backend.
//!
//! Panel generation and the distribution master problem describe their
//! models as a [`LinearProgram`] and hand them to a [`Solver`]. Nothing
//! outside this module knows which optimization library is linked.

#[cfg(feature = "microlp")]
mod microlp;

#[cfg(feature = "microlp")]
pub use microlp::MicroLpSolver;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Fatal solver failures. Infeasibility is not an error, see [`SolveOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Optimization backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid optimization model: {0}")]
    InvalidModel(String),
}

/// Result of a solve that reached the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// Proven optimal; `values` is indexed like the program's variables
    Optimal { values: Vec<f64>, objective: f64 },

    /// No assignment satisfies the constraints
    Infeasible,

    /// The backend stopped without proving optimality
    Unproven(String),
}

/// Handle to a variable inside a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Domain of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Binary,
    Continuous { min: Option<f64>, max: Option<f64> },
}

/// Constraint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessOrEqual,
    GreaterOrEqual,
    Equal,
}

/// `Σ coefficient * variable` terms.
pub type LinearExpr = Vec<(VarId, f64)>;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub terms: LinearExpr,
    pub comparison: Comparison,
    pub rhs: f64,
}

/// A maximization problem over binary and continuous variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearProgram {
    variables: Vec<VarKind>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary_var(&mut self) -> VarId {
        self.add_var(VarKind::Binary)
    }

    pub fn continuous_var(&mut self, min: Option<f64>, max: Option<f64>) -> VarId {
        self.add_var(VarKind::Continuous { min, max })
    }

    fn add_var(&mut self, kind: VarKind) -> VarId {
        self.variables.push(kind);
        VarId(self.variables.len() - 1)
    }

    pub fn constrain(&mut self, terms: LinearExpr, comparison: Comparison, rhs: f64) {
        self.constraints.push(LinearConstraint {
            terms,
            comparison,
            rhs,
        });
    }

    pub fn maximize(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn variables(&self) -> &[VarKind] {
        &self.variables
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    /// Evaluate the objective for a full assignment.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .map(|(var, coef)| coef * values.get(var.0).copied().unwrap_or(0.0))
            .sum()
    }

    /// Reject references to variables that were never declared.
    pub fn check(&self) -> Result<(), SolverError> {
        let n = self.variables.len();
        let all_terms = self
            .constraints
            .iter()
            .flat_map(|c| c.terms.iter())
            .chain(self.objective.iter());

        for (var, coef) in all_terms {
            if var.0 >= n {
                return Err(SolverError::InvalidModel(format!(
                    "variable #{} referenced but only {} declared",
                    var.0, n
                )));
            }
            if !coef.is_finite() {
                return Err(SolverError::InvalidModel(format!(
                    "non-finite coefficient {} on variable #{}",
                    coef, var.0
                )));
            }
        }
        Ok(())
    }
}

/// An LP/ILP backend.
pub trait Solver: Send + Sync {
    /// Short identifier used in logs and audit records.
    fn name(&self) -> &'static str;

    fn solve(&self, program: &LinearProgram) -> Result<SolveOutcome, SolverError>;
}

/// Backends selectable from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pure-Rust simplex / branch and bound through good_lp
    #[default]
    Microlp,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Microlp => "microlp",
        }
    }
}

/// Instantiate the configured backend.
///
/// Fails with [`SolverError::Unavailable`] when the backend was not compiled in.
pub fn solver_for(kind: BackendKind) -> Result<Arc<dyn Solver>, SolverError> {
    match kind {
        #[cfg(feature = "microlp")]
        BackendKind::Microlp => Ok(Arc::new(MicroLpSolver::new())),

        #[allow(unreachable_patterns)]
        other => Err(SolverError::Unavailable(format!(
            "backend '{}' is not compiled in; rebuild with `--features {}`",
            other.as_str(),
            other.as_str()
        ))),
    }
}
