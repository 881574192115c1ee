use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::membership::MembershipFunction;
use crate::model::{ConstraintModel, ScenarioParams};
use crate::program::{DecisionVariable, FuzzyGoal, VariableKind};
use crate::strategy::{FuzzyGp, GoalStanding};

/// Default allocation granularity in currency minor units
pub const DEFAULT_ROUNDING_STEP: f64 = 100_000.0;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Mandatory,
    Debt,
    Flexible,
    Goal,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub amount: f64,
    pub kind: AllocationKind,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SatisfactionSummary {
    pub average: f64,
    pub weighted: f64,
    pub achieved: usize,
    pub partial: usize,
    pub unachieved: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub allocations: BTreeMap<String, Allocation>,
    pub income: f64,
    pub total_allocated: f64,
    /// Income minus total after normalization; within tolerance unless
    /// every adjustable allocation hit a bound
    pub residual: f64,
    pub satisfaction: SatisfactionSummary,
    pub feasible: bool,
}

impl AllocationPlan {
    fn zero(model: &ConstraintModel) -> Self {
        let mut allocations = BTreeMap::new();
        for id in model.mandatory.keys() {
            allocations.insert(id.clone(), Allocation { amount: 0.0, kind: AllocationKind::Mandatory });
        }
        for id in model.debts.keys() {
            allocations.insert(id.clone(), Allocation { amount: 0.0, kind: AllocationKind::Debt });
        }
        for id in model.flexible.keys() {
            allocations.insert(id.clone(), Allocation { amount: 0.0, kind: AllocationKind::Flexible });
        }
        for id in model.goals.keys() {
            allocations.insert(id.clone(), Allocation { amount: 0.0, kind: AllocationKind::Goal });
        }
        Self {
            allocations,
            income: model.income,
            total_allocated: 0.0,
            residual: model.income,
            satisfaction: SatisfactionSummary {
                average: 0.0,
                weighted: 0.0,
                achieved: 0,
                partial: 0,
                unachieved: 0,
            },
            feasible: true,
        }
    }
}

/// Orchestrates one allocation: mandatory expenses and debts are resolved
/// heuristically (they must match externally computed values exactly and
/// never pass through a solver), flexible categories and goals go through
/// fuzzy goal programming on the remaining income, and a final
/// normalization pass makes the total match the income exactly.
pub struct Planner {
    model: ConstraintModel,
    params: ScenarioParams,
    rounding_step: f64,
    tolerance: f64,
}

impl Planner {
    pub fn new(model: ConstraintModel, params: ScenarioParams) -> Self {
        Self {
            model,
            params,
            rounding_step: DEFAULT_ROUNDING_STEP,
            tolerance: 0.01,
        }
    }

    /// Override the allocation granularity; 0 disables rounding
    pub fn with_rounding_step(mut self, step: f64) -> Self {
        self.rounding_step = step;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn allocate(&self) -> Result<AllocationPlan, EngineError> {
        self.model.validate()?;
        self.params.validate()?;

        let income = self.model.income;
        let committed = self.model.committed_minimums();
        if committed > income + self.tolerance {
            return Err(EngineError::InfeasibleMinimums {
                required: committed,
                available: income,
            });
        }
        if income <= 0.0 || self.model.is_empty() {
            debug!("degenerate model, returning a zero plan");
            return Ok(AllocationPlan::zero(&self.model));
        }

        // Heuristic layer: exact amounts, never solver-adjusted
        let mut allocations: BTreeMap<String, Allocation> = BTreeMap::new();
        for (id, mandatory) in &self.model.mandatory {
            allocations.insert(
                id.clone(),
                Allocation { amount: mandatory.minimum, kind: AllocationKind::Mandatory },
            );
        }
        for (id, debt) in &self.model.debts {
            allocations.insert(
                id.clone(),
                Allocation { amount: debt.committed_payment(), kind: AllocationKind::Debt },
            );
        }

        // Solver layer: flexible categories and goals on the reduced income
        let budget = income - committed;
        let (variables, goals, trim_floors) = self.build_program();
        let outcome = FuzzyGp::new().solve(&variables, &goals, budget)?;

        let mut lowers = BTreeMap::new();
        let mut caps = BTreeMap::new();
        for variable in &variables {
            let amount = outcome.amounts.get(&variable.id).copied().unwrap_or(0.0);
            let kind = match variable.kind {
                VariableKind::Category => AllocationKind::Flexible,
                _ => AllocationKind::Goal,
            };
            allocations.insert(variable.id.clone(), Allocation { amount, kind });
            lowers.insert(variable.id.clone(), variable.lower);
            caps.insert(variable.id.clone(), variable.solver_upper(income));
        }

        self.round_adjustables(&mut allocations, &lowers, &caps);
        let residual = self.normalize(&mut allocations, &trim_floors, &caps);
        if residual.abs() > self.tolerance {
            warn!(residual, "allocation could not be normalized to the income exactly");
        }

        let satisfaction = self.summarize(&goals, &allocations);
        let total_allocated: f64 = allocations.values().map(|a| a.amount).sum();

        Ok(AllocationPlan {
            allocations,
            income,
            total_allocated,
            residual,
            satisfaction,
            feasible: true,
        })
    }

    /// Decision variables and fuzzy goals for the solver layer, plus the
    /// floors the deficit-trimming pass must respect: a goal's floor is its
    /// (scaled) suggested contribution, a flexible category's floor is its
    /// minimum
    fn build_program(&self) -> (Vec<DecisionVariable>, Vec<FuzzyGoal>, BTreeMap<String, f64>) {
        let mut variables = Vec::new();
        let mut goals = Vec::new();
        let mut trim_floors = BTreeMap::new();

        for (id, flexible) in &self.model.flexible {
            let cap = (flexible.maximum * self.params.flexible_level).max(flexible.minimum);
            variables.push(DecisionVariable::new(
                id.clone(),
                VariableKind::Category,
                flexible.minimum,
                cap,
            ));
            trim_floors.insert(id.clone(), flexible.minimum);
        }

        for (id, goal) in &self.model.goals {
            let mut target = goal.suggested_contribution * self.params.goal_contribution_factor;
            let cap = if goal.remaining_amount > 0.0 {
                target = target.min(goal.remaining_amount);
                goal.remaining_amount
            } else {
                // Open-ended goal: bounded only by the income
                0.0
            };
            variables.push(DecisionVariable::new(id.clone(), VariableKind::Goal, 0.0, cap));
            trim_floors.insert(id.clone(), target);
            if target > 0.0 {
                goals.push(FuzzyGoal {
                    variable: id.clone(),
                    membership: MembershipFunction::s_curve(
                        0.0,
                        0.3 * target,
                        0.7 * target,
                        target,
                    ),
                    priority: goal.priority,
                    weight: goal.weight,
                });
            }
        }

        (variables, goals, trim_floors)
    }

    /// Round solver-layer allocations down to the configured granularity.
    /// Rounding down keeps the total at or below the income, so the
    /// normalization pass only ever has to spread a surplus it can place.
    /// Mandatory and debt rows keep their exact externally computed values.
    fn round_adjustables(
        &self,
        allocations: &mut BTreeMap<String, Allocation>,
        lowers: &BTreeMap<String, f64>,
        caps: &BTreeMap<String, f64>,
    ) {
        if self.rounding_step <= 0.0 {
            return;
        }
        for (id, allocation) in allocations.iter_mut() {
            if matches!(allocation.kind, AllocationKind::Mandatory | AllocationKind::Debt) {
                continue;
            }
            let rounded = (allocation.amount / self.rounding_step).floor() * self.rounding_step;
            let lower = lowers.get(id).copied().unwrap_or(0.0);
            let cap = caps.get(id).copied().unwrap_or(f64::INFINITY);
            allocation.amount = rounded.clamp(lower, cap);
        }
    }

    /// Push the total to the income exactly: surplus flows into goals first
    /// (respecting caps) then flexible categories; deficits trim the largest
    /// extras above each floor. Mandatory and debt rows are never touched.
    fn normalize(
        &self,
        allocations: &mut BTreeMap<String, Allocation>,
        floors: &BTreeMap<String, f64>,
        caps: &BTreeMap<String, f64>,
    ) -> f64 {
        for _ in 0..64 {
            let total: f64 = allocations.values().map(|a| a.amount).sum();
            let residual = self.model.income - total;
            if residual.abs() <= self.tolerance {
                return residual;
            }

            let moved = if residual > 0.0 {
                self.spread_surplus(allocations, caps, residual)
            } else {
                self.trim_deficit(allocations, floors, -residual)
            };
            if moved <= 0.0 {
                return residual;
            }
        }
        let total: f64 = allocations.values().map(|a| a.amount).sum();
        self.model.income - total
    }

    fn spread_surplus(
        &self,
        allocations: &mut BTreeMap<String, Allocation>,
        caps: &BTreeMap<String, f64>,
        surplus: f64,
    ) -> f64 {
        let mut moved = 0.0;
        let mut remaining = surplus;

        for kind in [AllocationKind::Goal, AllocationKind::Flexible] {
            if remaining <= 0.0 {
                break;
            }
            let ids: Vec<String> = allocations
                .iter()
                .filter(|(_, a)| a.kind == kind)
                .map(|(id, _)| id.clone())
                .collect();
            let headrooms: BTreeMap<&String, f64> = ids
                .iter()
                .map(|id| {
                    let cap = caps.get(id).copied().unwrap_or(f64::INFINITY);
                    let amount = allocations[id].amount;
                    (id, (cap - amount).max(0.0))
                })
                .collect();
            let total_headroom: f64 = headrooms.values().sum();
            if total_headroom <= 0.0 {
                continue;
            }

            let pool = remaining.min(total_headroom);
            for id in &ids {
                let headroom = headrooms[id];
                if headroom <= 0.0 {
                    continue;
                }
                let give = (pool * headroom / total_headroom).min(headroom);
                allocations.get_mut(id).expect("known id").amount += give;
                moved += give;
                remaining -= give;
            }
        }

        moved
    }

    fn trim_deficit(
        &self,
        allocations: &mut BTreeMap<String, Allocation>,
        floors: &BTreeMap<String, f64>,
        deficit: f64,
    ) -> f64 {
        // Largest extras first
        let mut extras: Vec<(String, f64)> = allocations
            .iter()
            .filter(|(_, a)| {
                matches!(a.kind, AllocationKind::Goal | AllocationKind::Flexible)
            })
            .filter_map(|(id, a)| {
                let floor = floors.get(id).copied().unwrap_or(0.0);
                let extra = a.amount - floor;
                (extra > 0.0).then(|| (id.clone(), extra))
            })
            .collect();
        extras.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut trimmed = 0.0;
        let mut remaining = deficit;
        for (id, extra) in extras {
            if remaining <= 0.0 {
                break;
            }
            let cut = extra.min(remaining);
            allocations.get_mut(&id).expect("known id").amount -= cut;
            trimmed += cut;
            remaining -= cut;
        }
        trimmed
    }

    /// Re-evaluate each goal's satisfaction at the normalized amounts so the
    /// reported degrees match what was actually allocated
    fn summarize(
        &self,
        goals: &[FuzzyGoal],
        allocations: &BTreeMap<String, Allocation>,
    ) -> SatisfactionSummary {
        let mut degree_sum = 0.0;
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut achieved = 0;
        let mut partial = 0;
        let mut unachieved = 0;

        for goal in goals {
            let amount = allocations
                .get(&goal.variable)
                .map_or(0.0, |a| a.amount);
            let degree = goal.membership.evaluate(amount);
            degree_sum += degree;
            weighted_sum += degree * goal.weight;
            weight_sum += goal.weight;
            match GoalStanding::from_satisfaction(degree) {
                GoalStanding::Achieved => achieved += 1,
                GoalStanding::Partial => partial += 1,
                GoalStanding::Unachieved => unachieved += 1,
            }
        }

        let count = goals.len() as f64;
        SatisfactionSummary {
            average: if count > 0.0 { degree_sum / count } else { 0.0 },
            weighted: if weight_sum > 0.0 { weighted_sum / weight_sum } else { 0.0 },
            achieved,
            partial,
            unachieved,
        }
    }
}
