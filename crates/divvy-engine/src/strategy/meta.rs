use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::BackendFactory;
use crate::error::EngineError;
use crate::linearize::{build_level_milp, load_backend};
use crate::program::{DecisionVariable, LevelGoal};

const BUDGET_TOLERANCE: f64 = 0.01;

/// Meta goal programming: each goal is rewarded at discrete target levels,
/// at most one level per goal. MILP-first with a greedy level-walking
/// fallback.
pub struct MetaGp {
    backend_factory: BackendFactory,
    /// Cap on upgrade passes in the greedy fallback
    max_iterations: usize,
}

/// Per-goal outcome of a meta solve
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    /// Index into the goal's level list, `None` when no level was reached
    pub level: Option<usize>,
    pub label: Option<String>,
    pub reward: f64,
    pub allocated: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MetaOutcome {
    pub amounts: BTreeMap<String, f64>,
    pub goals: BTreeMap<String, LevelReport>,
    pub total_reward: f64,
    pub possible_reward: f64,
    pub iterations: usize,
    pub feasible: bool,
}

impl Default for MetaGp {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaGp {
    pub fn new() -> Self {
        Self {
            backend_factory: divvy_solver::native_backend,
            max_iterations: 500,
        }
    }

    /// Run with no MILP backend; every solve takes the greedy path
    pub fn without_backend() -> Self {
        Self {
            backend_factory: |_| None,
            max_iterations: 500,
        }
    }

    pub fn solve(
        &self,
        variables: &[DecisionVariable],
        goals: &[LevelGoal],
        budget: f64,
    ) -> Result<MetaOutcome, EngineError> {
        let mut variables: Vec<DecisionVariable> = variables.to_vec();
        variables.sort_by(|a, b| a.id.cmp(&b.id));
        let mut goals: Vec<LevelGoal> = goals.to_vec();
        goals.sort_by(|a, b| {
            (a.priority, &a.variable).cmp(&(b.priority, &b.variable))
        });

        for goal in &goals {
            if !variables.iter().any(|v| v.id == goal.variable) {
                return Err(EngineError::InvalidModel(format!(
                    "goal references unknown variable '{}'",
                    goal.variable
                )));
            }
            let mut last = f64::NEG_INFINITY;
            for level in &goal.levels {
                if level.threshold < last {
                    return Err(EngineError::InvalidModel(format!(
                        "goal '{}' has unordered level thresholds",
                        goal.variable
                    )));
                }
                last = level.threshold;
            }
        }

        if variables.is_empty() || budget <= BUDGET_TOLERANCE {
            let amounts = variables.iter().map(|v| (v.id.clone(), 0.0)).collect();
            return Ok(self.outcome(&goals, amounts, 0));
        }

        if let Some(amounts) = self.try_milp(&variables, &goals, budget) {
            return Ok(self.outcome(&goals, amounts, 0));
        }

        let (amounts, iterations) = self.greedy(&variables, &goals, budget);
        Ok(self.outcome(&goals, amounts, iterations))
    }

    fn try_milp(
        &self,
        variables: &[DecisionVariable],
        goals: &[LevelGoal],
        budget: f64,
    ) -> Option<BTreeMap<String, f64>> {
        if goals.is_empty() {
            return None;
        }
        let encoded = build_level_milp(variables, goals, budget);
        let mut backend = (self.backend_factory)(encoded.problem.num_variables())?;
        load_backend(backend.as_mut(), &encoded.problem);
        let result = backend.solve();
        backend.release();

        match result {
            Ok(solution) if solution.is_optimal() => {
                debug!(iterations = solution.iterations, "meta MILP solve succeeded");
                Some(encoded.amounts(&solution.values))
            }
            Ok(solution) => {
                warn!(status = ?solution.status, "meta MILP not optimal, using greedy fallback");
                None
            }
            Err(error) => {
                warn!(%error, "meta MILP backend failed, using greedy fallback");
                None
            }
        }
    }

    /// Greedy fallback: reach the highest affordable level per goal in
    /// priority order, then spend the leftover on the best
    /// reward-per-dollar upgrade toward any goal's next level
    fn greedy(
        &self,
        variables: &[DecisionVariable],
        goals: &[LevelGoal],
        budget: f64,
    ) -> (BTreeMap<String, f64>, usize) {
        let uppers: BTreeMap<&str, f64> = variables
            .iter()
            .map(|v| (v.id.as_str(), v.solver_upper(budget)))
            .collect();
        let mut amounts: BTreeMap<String, f64> =
            variables.iter().map(|v| (v.id.clone(), 0.0)).collect();
        let mut remaining = budget;
        let mut iterations = 0usize;

        // First pass: walk each goal's levels from the top down and take
        // the best one the remaining budget can afford
        for goal in goals {
            let upper = uppers[goal.variable.as_str()];
            for level in goal.levels.iter().rev() {
                if level.threshold <= remaining + 1e-9 && level.threshold <= upper + 1e-9 {
                    *amounts.get_mut(&goal.variable).expect("known variable") = level.threshold;
                    remaining -= level.threshold;
                    break;
                }
            }
        }

        // Second pass: best reward-per-dollar partial upgrade to any goal's
        // next level
        while iterations < self.max_iterations && remaining > BUDGET_TOLERANCE {
            let mut best: Option<(&LevelGoal, f64, f64)> = None;
            for goal in goals {
                let current = amounts[&goal.variable];
                let upper = uppers[goal.variable.as_str()];
                let reached = reached_level(goal, current);
                let Some(next) = goal.levels.get(reached.map_or(0, |i| i + 1)) else {
                    continue;
                };
                if next.threshold > upper + 1e-9 {
                    continue;
                }
                let cost = next.threshold - current;
                if cost <= 1e-9 {
                    continue;
                }
                let current_reward = reached.map_or(0.0, |i| goal.levels[i].reward);
                let gain = (next.reward - current_reward) * goal.weight;
                if gain <= 0.0 {
                    continue;
                }
                let ratio = gain / cost;
                if best.is_none_or(|(_, r, _)| ratio > r) {
                    best = Some((goal, ratio, cost));
                }
            }
            let Some((goal, _, cost)) = best else {
                break;
            };
            // A partial upgrade parks money toward the level even when the
            // full cost is out of reach
            let give = cost.min(remaining);
            *amounts.get_mut(&goal.variable).expect("known variable") += give;
            remaining -= give;
            iterations += 1;
        }

        (amounts, iterations)
    }

    fn outcome(
        &self,
        goals: &[LevelGoal],
        amounts: BTreeMap<String, f64>,
        iterations: usize,
    ) -> MetaOutcome {
        let mut reports = BTreeMap::new();
        let mut total_reward = 0.0;
        let mut possible_reward = 0.0;

        for goal in goals {
            let allocated = amounts.get(&goal.variable).copied().unwrap_or(0.0);
            let reached = reached_level(goal, allocated);
            let (label, reward) = reached.map_or((None, 0.0), |i| {
                (Some(goal.levels[i].label.clone()), goal.levels[i].reward)
            });
            total_reward += reward;
            possible_reward += goal.max_reward();
            reports.insert(
                goal.variable.clone(),
                LevelReport {
                    level: reached,
                    label,
                    reward,
                    allocated,
                },
            );
        }

        MetaOutcome {
            amounts,
            goals: reports,
            total_reward,
            possible_reward,
            iterations,
            feasible: true,
        }
    }
}

/// Highest level whose threshold the allocation reaches
fn reached_level(goal: &LevelGoal, allocated: f64) -> Option<usize> {
    let mut reached = None;
    for (i, level) in goal.levels.iter().enumerate() {
        if allocated + 1e-9 >= level.threshold {
            reached = Some(i);
        }
    }
    reached
}
