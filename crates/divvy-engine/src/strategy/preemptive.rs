use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::program::{DecisionVariable, DeviationGoal};

/// Preemptive (lexicographic) goal programming: tiers are satisfied in
/// strict priority order, and a processed tier's allocations are frozen
/// before any lower tier sees the remaining budget.
pub struct PreemptiveGp {
    /// A goal achieves its target when the shortfall is below this
    tolerance: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: f64,
    pub allocated: f64,
    /// Signed distance from the target (positive = shortfall)
    pub deviation: f64,
    pub achieved: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TierReport {
    pub priority: u32,
    /// Whether every goal in the tier achieved its target
    pub satisfied: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptiveOutcome {
    pub amounts: BTreeMap<String, f64>,
    pub goals: BTreeMap<String, TargetReport>,
    pub tiers: Vec<TierReport>,
    pub feasible: bool,
}

impl Default for PreemptiveGp {
    fn default() -> Self {
        Self::new()
    }
}

impl PreemptiveGp {
    pub fn new() -> Self {
        Self { tolerance: 0.01 }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn solve(
        &self,
        variables: &[DecisionVariable],
        goals: &[DeviationGoal],
        budget: f64,
    ) -> Result<PreemptiveOutcome, EngineError> {
        let uppers: BTreeMap<&str, f64> = variables
            .iter()
            .map(|v| (v.id.as_str(), v.solver_upper(budget)))
            .collect();
        for goal in goals {
            if !uppers.contains_key(goal.variable.as_str()) {
                return Err(EngineError::InvalidModel(format!(
                    "goal references unknown variable '{}'",
                    goal.variable
                )));
            }
        }

        let mut amounts: BTreeMap<String, f64> =
            variables.iter().map(|v| (v.id.clone(), 0.0)).collect();
        let mut remaining = budget.max(0.0);

        // Tiers in strict priority order; within a tier heavier goals first,
        // IDs break the remaining ties deterministically
        let mut tiers: BTreeMap<u32, Vec<&DeviationGoal>> = BTreeMap::new();
        for goal in goals {
            tiers.entry(goal.priority).or_default().push(goal);
        }

        let mut reports = BTreeMap::new();
        let mut tier_reports = Vec::with_capacity(tiers.len());

        for (&priority, tier) in &mut tiers {
            tier.sort_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.variable.cmp(&b.variable))
            });

            let mut satisfied = true;
            for goal in tier.iter() {
                let current = amounts[&goal.variable];
                let headroom = (uppers[goal.variable.as_str()] - current).max(0.0);
                let wanted = (goal.target - current).max(0.0);
                let granted = wanted.min(headroom).min(remaining);

                *amounts.get_mut(&goal.variable).expect("known variable") += granted;
                remaining -= granted;

                let allocated = amounts[&goal.variable];
                let deviation = goal.target - allocated;
                let achieved = deviation < self.tolerance;
                satisfied &= achieved;
                reports.insert(
                    goal.variable.clone(),
                    TargetReport {
                        target: goal.target,
                        allocated,
                        deviation,
                        achieved,
                    },
                );
            }
            // The tier is now frozen; lower tiers only ever see `remaining`
            tier_reports.push(TierReport {
                priority,
                satisfied,
            });
        }

        Ok(PreemptiveOutcome {
            amounts,
            goals: reports,
            tiers: tier_reports,
            feasible: true,
        })
    }
}
