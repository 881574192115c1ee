use thiserror::Error;

use crate::branch_bound::{solve_milp, MilpOptions};
use crate::problem::{ConstraintOp, LpProblem};
use crate::simplex::Solver;
use crate::solution::Solution;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("MILP backend unavailable: {0}")]
    Unavailable(String),
    #[error("MILP backend failed: {0}")]
    Solve(String),
}

/// Abstract contract for a mixed-integer solver backend.
///
/// A backend instance models one problem lifecycle: populate it with
/// `set_objective`/`add_constraint`/`set_bounds`/`set_binary`, call `solve`,
/// then `release` it. `release` must be safe to call more than once and is
/// invoked on every exit path, since an implementation may wrap a native
/// library handle.
pub trait MilpBackend {
    fn set_objective(&mut self, coefficients: &[f64], maximize: bool);
    fn add_constraint(&mut self, coefficients: &[f64], op: ConstraintOp, rhs: f64);
    fn set_bounds(&mut self, var: usize, lower: f64, upper: f64);
    fn set_binary(&mut self, var: usize);
    fn solve(&mut self) -> Result<Solution, BackendError>;
    fn release(&mut self);
}

/// Capability check for the default backend.
///
/// Returns `None` when no MILP-capable solver can be constructed; callers
/// must treat that as a normal outcome and fall back to their heuristics.
/// The in-process branch-and-bound backend needs no external library, so
/// this only fails for a zero-variable model.
pub fn native_backend(num_vars: usize) -> Option<Box<dyn MilpBackend>> {
    if num_vars == 0 {
        return None;
    }
    Some(Box::new(BranchBoundBackend::new(num_vars)))
}

/// In-process MILP backend built on the simplex relaxation
pub struct BranchBoundBackend {
    problem: LpProblem,
    solver: Solver,
    options: MilpOptions,
    released: bool,
}

impl BranchBoundBackend {
    pub fn new(num_vars: usize) -> Self {
        let variables = (0..num_vars).map(|j| format!("x{j}")).collect();
        Self {
            problem: LpProblem::new(variables),
            solver: Solver::new(),
            options: MilpOptions::default(),
            released: false,
        }
    }

    pub fn with_options(mut self, options: MilpOptions) -> Self {
        self.options = options;
        self
    }
}

impl MilpBackend for BranchBoundBackend {
    fn set_objective(&mut self, coefficients: &[f64], maximize: bool) {
        self.problem.set_objective(coefficients.to_vec(), !maximize);
    }

    fn add_constraint(&mut self, coefficients: &[f64], op: ConstraintOp, rhs: f64) {
        let index = self.problem.num_constraints();
        self.problem
            .add_constraint(format!("c{index}"), coefficients.to_vec(), op, rhs);
    }

    fn set_bounds(&mut self, var: usize, lower: f64, upper: f64) {
        self.problem.set_bounds(var, lower, upper);
    }

    fn set_binary(&mut self, var: usize) {
        self.problem.set_binary(var);
    }

    fn solve(&mut self) -> Result<Solution, BackendError> {
        if self.released {
            return Err(BackendError::Unavailable(
                "backend already released".to_string(),
            ));
        }
        Ok(solve_milp(&self.problem, &self.solver, &self.options))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

impl Drop for BranchBoundBackend {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::SolutionStatus;

    #[test]
    fn test_backend_solves_through_trait() {
        let mut backend = native_backend(2).expect("backend available");
        backend.set_objective(&[1.0, 1.0], true);
        backend.add_constraint(&[1.0, 1.0], ConstraintOp::Le, 10.0);
        backend.set_bounds(0, 0.0, 6.0);
        backend.set_bounds(1, 0.0, 6.0);

        let solution = backend.solve().unwrap();
        backend.release();

        assert_eq!(solution.status, SolutionStatus::Optimal);
        let total: f64 = solution.values.iter().sum();
        assert!((total - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_solve_after_release_fails() {
        let mut backend = BranchBoundBackend::new(1);
        backend.set_objective(&[1.0], true);
        backend.release();

        assert!(backend.solve().is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut backend = BranchBoundBackend::new(1);
        backend.release();
        backend.release();
    }

    #[test]
    fn test_zero_variable_factory_is_absent() {
        assert!(native_backend(0).is_none());
    }
}
