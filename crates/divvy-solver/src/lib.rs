mod backend;
mod branch_bound;
mod problem;
mod simplex;
mod solution;

pub use backend::{native_backend, BackendError, BranchBoundBackend, MilpBackend};
pub use branch_bound::{solve_milp, MilpOptions};
pub use problem::{Constraint, ConstraintOp, LpProblem, Objective};
pub use simplex::Solver;
pub use solution::{Solution, SolutionStatus};
