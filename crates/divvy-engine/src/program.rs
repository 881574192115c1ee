use crate::membership::MembershipFunction;

/// Semantic type of an allocatable item
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// A flexible spending category
    Category,
    /// A debt payment
    Debt,
    /// A savings goal
    Goal,
}

/// One allocatable item handed to a strategy
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionVariable {
    pub id: String,
    pub kind: VariableKind,
    pub lower: f64,
    /// Domain convention: 0 means unbounded above. The solver always gets
    /// a finite bound via [`Self::solver_upper`].
    pub upper: f64,
}

impl DecisionVariable {
    pub fn new(id: impl Into<String>, kind: VariableKind, lower: f64, upper: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            lower,
            upper,
        }
    }

    /// The finite upper bound used in LP/MILP formulations. No allocation
    /// can exceed the budget, so the budget stands in for "unbounded".
    pub fn solver_upper(&self, budget: f64) -> f64 {
        if self.upper <= 0.0 {
            budget
        } else {
            self.upper.min(budget.max(self.lower))
        }
    }
}

/// A goal with a continuous satisfaction curve
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyGoal {
    pub variable: String,
    pub membership: MembershipFunction,
    /// Lower integer = higher priority
    pub priority: u32,
    /// Tie-breaker multiplier within a priority tier
    pub weight: f64,
}

/// One discrete reward step of a [`LevelGoal`]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TargetLevel {
    /// Allocation needed to earn this level
    pub threshold: f64,
    pub reward: f64,
    pub label: String,
}

/// A goal rewarded at discrete target levels, ordered by ascending threshold
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LevelGoal {
    pub variable: String,
    pub levels: Vec<TargetLevel>,
    pub priority: u32,
    pub weight: f64,
}

impl LevelGoal {
    pub fn max_reward(&self) -> f64 {
        self.levels.iter().map(|l| l.reward).fold(0.0, f64::max)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationKind {
    /// Penalize falling short of the target
    AtLeast,
    /// Penalize exceeding the target
    AtMost,
    /// Penalize any distance from the target
    Exactly,
}

/// A goal expressed as a single deviation target
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DeviationGoal {
    pub variable: String,
    pub target: f64,
    pub kind: DeviationKind,
    pub priority: u32,
    pub weight: f64,
}

/// Objective multiplier approximating lexicographic priority inside a single
/// objective: each tier above the lowest multiplies by another factor of 10.
///
/// This is an approximation, not a guaranteed lexicographic solve: with many
/// tiers or very large weights a mass of low-priority contributions can still
/// outweigh one high-priority goal.
pub fn priority_scale(priority: u32, max_priority: u32) -> f64 {
    let gap = max_priority.saturating_sub(priority);
    10f64.powi(gap.min(12) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_upper_replaces_unbounded() {
        let open = DecisionVariable::new("save", VariableKind::Goal, 0.0, 0.0);
        assert_eq!(open.solver_upper(10_000.0), 10_000.0);

        let capped = DecisionVariable::new("fun", VariableKind::Category, 0.0, 2_000.0);
        assert_eq!(capped.solver_upper(10_000.0), 2_000.0);
        assert_eq!(capped.solver_upper(1_500.0), 1_500.0);
    }

    #[test]
    fn test_priority_scale_orders_tiers() {
        assert!(priority_scale(1, 3) > priority_scale(2, 3));
        assert!(priority_scale(2, 3) > priority_scale(3, 3));
        assert_eq!(priority_scale(3, 3), 1.0);
    }
}
