//! good_lp adapter using the pure-Rust `microlp` solver.

use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};

use super::{
    Comparison, LinearExpr, LinearProgram, SolveOutcome, Solver, SolverError, VarKind,
};

/// Tolerance for constraints that reference no variables.
const CONSTANT_TOLERANCE: f64 = 1e-9;

/// Solves [`LinearProgram`]s with microlp (simplex plus branch and bound).
#[derive(Debug, Default, Clone, Copy)]
pub struct MicroLpSolver;

impl MicroLpSolver {
    pub fn new() -> Self {
        Self
    }
}

fn expression(handles: &[Variable], terms: &LinearExpr) -> Expression {
    terms
        .iter()
        .fold(Expression::from(0.0), |acc, (var, coef)| {
            acc + *coef * handles[var.index()]
        })
}

fn constant_holds(comparison: Comparison, rhs: f64) -> bool {
    match comparison {
        Comparison::LessOrEqual => 0.0 <= rhs + CONSTANT_TOLERANCE,
        Comparison::GreaterOrEqual => 0.0 >= rhs - CONSTANT_TOLERANCE,
        Comparison::Equal => rhs.abs() <= CONSTANT_TOLERANCE,
    }
}

impl Solver for MicroLpSolver {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(&self, program: &LinearProgram) -> Result<SolveOutcome, SolverError> {
        program.check()?;

        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = program
            .variables()
            .iter()
            .map(|kind| match *kind {
                VarKind::Binary => vars.add(variable().binary()),
                VarKind::Continuous { min, max } => {
                    let mut definition = variable();
                    if let Some(lower) = min {
                        definition = definition.min(lower);
                    }
                    if let Some(upper) = max {
                        definition = definition.max(upper);
                    }
                    vars.add(definition)
                }
            })
            .collect();

        let objective = expression(&handles, program.objective());
        let mut problem = vars.maximise(objective).using(microlp);

        for row in program.constraints() {
            if row.terms.is_empty() {
                if constant_holds(row.comparison, row.rhs) {
                    continue;
                }
                return Ok(SolveOutcome::Infeasible);
            }

            let lhs = expression(&handles, &row.terms);
            let rhs = row.rhs;
            let built = match row.comparison {
                Comparison::LessOrEqual => constraint!(lhs <= rhs),
                Comparison::GreaterOrEqual => constraint!(lhs >= rhs),
                Comparison::Equal => constraint!(lhs == rhs),
            };
            problem = problem.with(built);
        }

        match problem.solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
                let objective = program.objective_value(&values);
                Ok(SolveOutcome::Optimal { values, objective })
            }
            Err(ResolutionError::Infeasible) => Ok(SolveOutcome::Infeasible),
            Err(other) => Ok(SolveOutcome::Unproven(format!("{:?}", other))),
        }
    }
}
