//! Goal-programming strategies.
//!
//! Every strategy is stateless across calls and follows the same shape:
//! build a problem from decision variables and goals, try the MILP backend
//! when one is available, fall back to a greedy heuristic on any backend
//! failure, then map the solver output back to item IDs and aggregate
//! metrics.

mod deviation;
mod fuzzy;
mod hybrid;
mod meta;
mod preemptive;

pub use deviation::{DeviationGp, DeviationOutcome, DeviationReport};
pub use fuzzy::{FuzzyGp, FuzzyOutcome, GoalReport};
pub use hybrid::{BucketReport, HybridGp, HybridOutcome, SurplusBucket};
pub use meta::{LevelReport, MetaGp, MetaOutcome};
pub use preemptive::{PreemptiveGp, PreemptiveOutcome, TargetReport, TierReport};

use divvy_solver::MilpBackend;

/// Constructor for a per-solve backend instance; `None` means no
/// MILP-capable backend and every strategy degrades to its heuristic
pub type BackendFactory = fn(usize) -> Option<Box<dyn MilpBackend>>;

/// A goal counts as achieved at or above this satisfaction degree
pub const ACHIEVED_THRESHOLD: f64 = 0.8;
/// Below this degree a goal counts as unachieved rather than partial
pub const PARTIAL_THRESHOLD: f64 = 0.3;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStanding {
    Achieved,
    Partial,
    Unachieved,
}

impl GoalStanding {
    pub fn from_satisfaction(degree: f64) -> Self {
        if degree >= ACHIEVED_THRESHOLD {
            Self::Achieved
        } else if degree >= PARTIAL_THRESHOLD {
            Self::Partial
        } else {
            Self::Unachieved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standing_thresholds() {
        assert_eq!(GoalStanding::from_satisfaction(1.0), GoalStanding::Achieved);
        assert_eq!(GoalStanding::from_satisfaction(0.8), GoalStanding::Achieved);
        assert_eq!(GoalStanding::from_satisfaction(0.5), GoalStanding::Partial);
        assert_eq!(GoalStanding::from_satisfaction(0.3), GoalStanding::Partial);
        assert_eq!(
            GoalStanding::from_satisfaction(0.1),
            GoalStanding::Unachieved
        );
    }
}
