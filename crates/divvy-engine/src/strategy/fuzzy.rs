use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{BackendFactory, GoalStanding};
use crate::error::EngineError;
use crate::linearize::{build_fuzzy_milp, load_backend};
use crate::program::{DecisionVariable, FuzzyGoal, VariableKind};

const BUDGET_TOLERANCE: f64 = 0.01;
/// Increments shrink with the remaining budget but never below this floor
const MIN_INCREMENT: f64 = 0.5;

/// Fuzzy goal programming: maximize membership degrees, MILP-first with a
/// greedy incremental fallback
pub struct FuzzyGp {
    backend_factory: BackendFactory,
    /// Cap on greedy passes per priority tier
    max_iterations: usize,
}

/// Per-goal outcome of a fuzzy solve
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct GoalReport {
    pub satisfaction: f64,
    pub standing: GoalStanding,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyOutcome {
    pub amounts: BTreeMap<String, f64>,
    pub goals: BTreeMap<String, GoalReport>,
    pub average_satisfaction: f64,
    pub weighted_satisfaction: f64,
    pub iterations: usize,
    pub feasible: bool,
}

impl Default for FuzzyGp {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzyGp {
    pub fn new() -> Self {
        Self {
            backend_factory: divvy_solver::native_backend,
            max_iterations: 500,
        }
    }

    /// Run with no MILP backend at all; every solve takes the greedy path
    pub fn without_backend() -> Self {
        Self {
            backend_factory: |_| None,
            max_iterations: 500,
        }
    }

    pub fn solve(
        &self,
        variables: &[DecisionVariable],
        goals: &[FuzzyGoal],
        budget: f64,
    ) -> Result<FuzzyOutcome, EngineError> {
        // Deterministic working order regardless of caller ordering
        let mut variables: Vec<DecisionVariable> = variables.to_vec();
        variables.sort_by(|a, b| a.id.cmp(&b.id));
        let mut goals: Vec<FuzzyGoal> = goals.to_vec();
        goals.sort_by(|a, b| (a.priority, &a.variable).cmp(&(b.priority, &b.variable)));

        for goal in &goals {
            if !variables.iter().any(|v| v.id == goal.variable) {
                return Err(EngineError::InvalidModel(format!(
                    "goal references unknown variable '{}'",
                    goal.variable
                )));
            }
        }

        let required: f64 = variables.iter().map(|v| v.lower).sum();
        if required > budget + BUDGET_TOLERANCE {
            return Err(EngineError::InfeasibleMinimums {
                required,
                available: budget,
            });
        }

        if variables.is_empty() || budget <= BUDGET_TOLERANCE {
            let amounts = variables.iter().map(|v| (v.id.clone(), v.lower)).collect();
            return Ok(self.outcome(&goals, amounts, 0));
        }

        if let Some(amounts) = self.try_milp(&variables, &goals, budget) {
            return Ok(self.outcome(&goals, amounts, 0));
        }

        let (amounts, iterations) = self.greedy(&variables, &goals, budget);
        Ok(self.outcome(&goals, amounts, iterations))
    }

    /// Attempt the MILP path; `None` on any backend absence or failure
    fn try_milp(
        &self,
        variables: &[DecisionVariable],
        goals: &[FuzzyGoal],
        budget: f64,
    ) -> Option<BTreeMap<String, f64>> {
        if goals.is_empty() {
            return None;
        }
        let encoded = build_fuzzy_milp(variables, goals, budget);
        let mut backend = (self.backend_factory)(encoded.problem.num_variables())?;
        load_backend(backend.as_mut(), &encoded.problem);
        let result = backend.solve();
        backend.release();

        match result {
            Ok(solution) if solution.is_optimal() => {
                debug!(iterations = solution.iterations, "fuzzy MILP solve succeeded");
                Some(encoded.amounts(&solution.values))
            }
            Ok(solution) => {
                warn!(status = ?solution.status, "fuzzy MILP not optimal, using greedy fallback");
                None
            }
            Err(error) => {
                warn!(%error, "fuzzy MILP backend failed, using greedy fallback");
                None
            }
        }
    }

    /// Greedy incremental allocation: minimums first, then per-tier
    /// improvement-weighted increments, then leftover distribution
    fn greedy(
        &self,
        variables: &[DecisionVariable],
        goals: &[FuzzyGoal],
        budget: f64,
    ) -> (BTreeMap<String, f64>, usize) {
        let uppers: BTreeMap<&str, f64> = variables
            .iter()
            .map(|v| (v.id.as_str(), v.solver_upper(budget)))
            .collect();
        let mut amounts: BTreeMap<String, f64> =
            variables.iter().map(|v| (v.id.clone(), v.lower)).collect();
        let mut remaining = budget - amounts.values().sum::<f64>();
        let mut iterations = 0usize;

        // Tier by tier, highest priority (lowest integer) first
        let mut tiers: BTreeMap<u32, Vec<&FuzzyGoal>> = BTreeMap::new();
        for goal in goals {
            tiers.entry(goal.priority).or_default().push(goal);
        }

        for tier in tiers.values() {
            let mut tier_passes = 0usize;
            while tier_passes < self.max_iterations && remaining > BUDGET_TOLERANCE {
                let step = (remaining / 200.0).max(MIN_INCREMENT).min(remaining);

                let mut shares: Vec<(&FuzzyGoal, f64, f64)> = Vec::new();
                let mut total_share = 0.0;
                for &goal in tier {
                    let current = amounts[&goal.variable];
                    let headroom = uppers[goal.variable.as_str()] - current;
                    if headroom <= 1e-9 {
                        continue;
                    }
                    let probe = step.min(headroom);
                    let gain =
                        goal.membership.evaluate(current + probe) - goal.membership.evaluate(current);
                    if gain > 1e-12 {
                        let share = (gain / probe) * goal.weight;
                        if share > 0.0 {
                            shares.push((goal, share, headroom));
                            total_share += share;
                        }
                    }
                }
                if shares.is_empty() || total_share <= 0.0 {
                    break;
                }

                tier_passes += 1;
                iterations += 1;
                for (goal, share, headroom) in shares {
                    let give = (step * share / total_share).min(headroom).min(remaining);
                    if give <= 0.0 {
                        continue;
                    }
                    *amounts.get_mut(&goal.variable).expect("known variable") += give;
                    remaining -= give;
                }
            }
        }

        // Leftover: best improvement ratio across all tiers
        let mut leftover_passes = 0usize;
        while leftover_passes < self.max_iterations && remaining > BUDGET_TOLERANCE {
            let step = (remaining / 200.0).max(MIN_INCREMENT).min(remaining);
            let mut best: Option<(&FuzzyGoal, f64, f64)> = None;
            for goal in goals {
                let current = amounts[&goal.variable];
                let headroom = uppers[goal.variable.as_str()] - current;
                if headroom <= 1e-9 {
                    continue;
                }
                let probe = step.min(headroom);
                let gain =
                    goal.membership.evaluate(current + probe) - goal.membership.evaluate(current);
                let ratio = (gain / probe) * goal.weight;
                if gain > 1e-12 && best.is_none_or(|(_, r, _)| ratio > r) {
                    best = Some((goal, ratio, probe));
                }
            }
            let Some((goal, _, probe)) = best else {
                break;
            };
            *amounts.get_mut(&goal.variable).expect("known variable") += probe;
            remaining -= probe;
            leftover_passes += 1;
            iterations += 1;
        }

        // Then flexible categories, proportionally to their targets
        if remaining > BUDGET_TOLERANCE {
            let categories: Vec<&DecisionVariable> = variables
                .iter()
                .filter(|v| v.kind == VariableKind::Category)
                .collect();
            let total_target: f64 = categories
                .iter()
                .map(|v| uppers[v.id.as_str()])
                .sum();
            if total_target > 0.0 {
                let pool = remaining;
                for variable in &categories {
                    let target = uppers[variable.id.as_str()];
                    let headroom = target - amounts[&variable.id];
                    let give = (pool * target / total_target).min(headroom).min(remaining);
                    if give > 0.0 {
                        *amounts.get_mut(&variable.id).expect("known variable") += give;
                        remaining -= give;
                    }
                }
            }
        }

        // Finally any variable with headroom left
        if remaining > BUDGET_TOLERANCE {
            for variable in variables {
                let headroom = uppers[variable.id.as_str()] - amounts[&variable.id];
                let give = headroom.min(remaining);
                if give > 0.0 {
                    *amounts.get_mut(&variable.id).expect("known variable") += give;
                    remaining -= give;
                }
                if remaining <= BUDGET_TOLERANCE {
                    break;
                }
            }
        }

        (amounts, iterations)
    }

    fn outcome(
        &self,
        goals: &[FuzzyGoal],
        amounts: BTreeMap<String, f64>,
        iterations: usize,
    ) -> FuzzyOutcome {
        let mut reports = BTreeMap::new();
        let mut degree_sum = 0.0;
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for goal in goals {
            let allocated = amounts.get(&goal.variable).copied().unwrap_or(0.0);
            let satisfaction = goal.membership.evaluate(allocated);
            degree_sum += satisfaction;
            weighted_sum += satisfaction * goal.weight;
            weight_sum += goal.weight;
            reports.insert(
                goal.variable.clone(),
                GoalReport {
                    satisfaction,
                    standing: GoalStanding::from_satisfaction(satisfaction),
                },
            );
        }

        let count = goals.len() as f64;
        FuzzyOutcome {
            amounts,
            goals: reports,
            average_satisfaction: if count > 0.0 { degree_sum / count } else { 0.0 },
            weighted_satisfaction: if weight_sum > 0.0 {
                weighted_sum / weight_sum
            } else {
                0.0
            },
            iterations,
            feasible: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipFunction;
    use crate::program::VariableKind;

    fn triangular_goal(variable: &str, peak: f64, priority: u32) -> FuzzyGoal {
        FuzzyGoal {
            variable: variable.to_string(),
            membership: MembershipFunction::Triangular {
                lower: 0.0,
                peak,
                upper: 2.0 * peak,
            },
            priority,
            weight: 1.0,
        }
    }

    fn goal_var(id: &str, upper: f64) -> DecisionVariable {
        DecisionVariable::new(id, VariableKind::Goal, 0.0, upper)
    }

    #[test]
    fn test_sufficient_budget_achieves_both_goals() {
        let variables = vec![goal_var("a", 1_000.0), goal_var("b", 700.0)];
        let goals = vec![triangular_goal("a", 1_000.0, 1), triangular_goal("b", 700.0, 2)];

        let outcome = FuzzyGp::new().solve(&variables, &goals, 5_000.0).unwrap();

        assert!(outcome.feasible);
        assert!(
            outcome.goals["a"].satisfaction >= 0.8,
            "a = {}",
            outcome.goals["a"].satisfaction
        );
        assert!(
            outcome.goals["b"].satisfaction >= 0.8,
            "b = {}",
            outcome.goals["b"].satisfaction
        );
    }

    #[test]
    fn test_scarce_budget_favors_higher_priority() {
        let variables = vec![goal_var("a", 1_000.0), goal_var("b", 700.0)];
        let goals = vec![triangular_goal("a", 1_000.0, 1), triangular_goal("b", 700.0, 2)];

        let outcome = FuzzyGp::new().solve(&variables, &goals, 1_000.0).unwrap();

        assert!(outcome.amounts["a"] > outcome.amounts["b"]);
        assert!(outcome.amounts["a"] >= 400.0, "a = {}", outcome.amounts["a"]);
    }

    #[test]
    fn test_greedy_fallback_matches_priority_order() {
        let variables = vec![goal_var("a", 1_000.0), goal_var("b", 700.0)];
        let goals = vec![triangular_goal("a", 1_000.0, 1), triangular_goal("b", 700.0, 2)];

        let outcome = FuzzyGp::without_backend()
            .solve(&variables, &goals, 1_000.0)
            .unwrap();

        assert!(outcome.amounts["a"] > outcome.amounts["b"]);
        assert!(outcome.amounts["a"] >= 400.0);
        assert!(outcome.iterations > 0);
    }

    #[test]
    fn test_minimums_exceeding_budget_fail() {
        let variables = vec![DecisionVariable::new(
            "rentish",
            VariableKind::Category,
            2_000.0,
            3_000.0,
        )];

        let result = FuzzyGp::new().solve(&variables, &[], 1_000.0);

        assert!(matches!(
            result,
            Err(EngineError::InfeasibleMinimums { .. })
        ));
    }

    #[test]
    fn test_zero_budget_is_a_zero_result() {
        let variables = vec![goal_var("a", 1_000.0)];
        let goals = vec![triangular_goal("a", 1_000.0, 1)];

        let outcome = FuzzyGp::new().solve(&variables, &goals, 0.0).unwrap();

        assert!(outcome.feasible);
        assert_eq!(outcome.amounts["a"], 0.0);
    }

    #[test]
    fn test_zero_variables_is_a_zero_result() {
        let outcome = FuzzyGp::new().solve(&[], &[], 5_000.0).unwrap();
        assert!(outcome.feasible);
        assert!(outcome.amounts.is_empty());
    }

    #[test]
    fn test_leftover_flows_to_categories() {
        let variables = vec![
            goal_var("save", 1_000.0),
            DecisionVariable::new("fun", VariableKind::Category, 0.0, 3_000.0),
        ];
        let goals = vec![triangular_goal("save", 1_000.0, 1)];

        let outcome = FuzzyGp::without_backend()
            .solve(&variables, &goals, 2_500.0)
            .unwrap();

        // The goal saturates at its peak; the category soaks up the rest
        assert!((outcome.amounts["save"] - 1_000.0).abs() < 1.0);
        assert!(outcome.amounts["fun"] > 1_000.0);
    }

    #[test]
    fn test_identical_inputs_solve_identically() {
        let variables = vec![goal_var("a", 1_000.0), goal_var("b", 700.0)];
        let goals = vec![triangular_goal("a", 1_000.0, 1), triangular_goal("b", 700.0, 2)];

        let first = FuzzyGp::new().solve(&variables, &goals, 1_500.0).unwrap();
        let second = FuzzyGp::new().solve(&variables, &goals, 1_500.0).unwrap();

        assert_eq!(first, second);
    }
}
