pub mod error;
pub mod linearize;
pub mod membership;
pub mod model;
pub mod planner;
pub mod program;
pub mod strategy;

pub use error::EngineError;
pub use membership::{MembershipFunction, Segment};
pub use model::{
    ConstraintModel, DebtConstraint, FlexibleConstraint, GoalConstraint, MandatoryConstraint,
    ScenarioParams,
};
pub use planner::{
    Allocation, AllocationKind, AllocationPlan, Planner, SatisfactionSummary,
    DEFAULT_ROUNDING_STEP,
};
pub use program::{
    priority_scale, DecisionVariable, DeviationGoal, DeviationKind, FuzzyGoal, LevelGoal,
    TargetLevel, VariableKind,
};
pub use strategy::{
    DeviationGp, FuzzyGp, GoalStanding, HybridGp, MetaGp, PreemptiveGp, ACHIEVED_THRESHOLD,
    PARTIAL_THRESHOLD,
};
