use divvy_solver::SolutionStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Mandatory expenses and debt minimums alone exceed the income.
    /// No allocation can cover the committed floor, so the solve fails
    /// outright rather than silently under-paying an obligation.
    #[error("committed minimums of {required:.2} exceed income {available:.2} (deficit {:.2})", .required - .available)]
    InfeasibleMinimums { required: f64, available: f64 },

    /// The LP/MILP solver finished without an optimal solution and the
    /// strategy has no heuristic fallback left.
    #[error("solver finished without an optimal solution: {0:?}")]
    SolveFailed(SolutionStatus),

    /// The constraint model or scenario parameters violate an invariant.
    #[error("invalid model: {0}")]
    InvalidModel(String),
}
