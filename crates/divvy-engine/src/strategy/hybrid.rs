use std::collections::BTreeMap;

use tracing::debug;

use crate::error::EngineError;
use crate::model::{ConstraintModel, ScenarioParams};
use crate::program::TargetLevel;

const BUDGET_TOLERANCE: f64 = 0.01;
const MAX_UPGRADE_PASSES: usize = 500;

/// Hybrid goal programming, three phases: heuristic minimums, a proportional
/// surplus split into four buckets, then an independent level-picking and
/// upgrade optimization inside each bucket.
pub struct HybridGp;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurplusBucket {
    Emergency,
    ExtraDebt,
    Goals,
    Flexible,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BucketReport {
    pub bucket: SurplusBucket,
    pub budget: f64,
    pub spent: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HybridOutcome {
    pub amounts: BTreeMap<String, f64>,
    pub buckets: Vec<BucketReport>,
    pub feasible: bool,
}

/// One allocatable item inside a bucket, rewarded at ladder levels
struct BucketItem {
    id: String,
    cap: f64,
    levels: Vec<TargetLevel>,
    priority: u32,
}

impl Default for HybridGp {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridGp {
    pub fn new() -> Self {
        Self
    }

    pub fn solve(
        &self,
        model: &ConstraintModel,
        params: &ScenarioParams,
    ) -> Result<HybridOutcome, EngineError> {
        model.validate()?;
        params.validate()?;

        // Phase 1: mandatory and debt minimums, never negotiable
        let mut amounts: BTreeMap<String, f64> = BTreeMap::new();
        for (id, mandatory) in &model.mandatory {
            amounts.insert(id.clone(), mandatory.minimum);
        }
        for (id, debt) in &model.debts {
            amounts.insert(id.clone(), debt.committed_payment());
        }
        let committed: f64 = amounts.values().sum();
        if committed > model.income + BUDGET_TOLERANCE {
            return Err(EngineError::InfeasibleMinimums {
                required: committed,
                available: model.income,
            });
        }
        for id in model.flexible.keys() {
            amounts.entry(id.clone()).or_insert(0.0);
        }
        for id in model.goals.keys() {
            amounts.entry(id.clone()).or_insert(0.0);
        }

        // Phase 2: split the surplus into the scenario's four buckets
        let surplus = model.income - committed;
        let plan = [
            (SurplusBucket::Emergency, params.surplus_emergency_pct),
            (SurplusBucket::ExtraDebt, params.surplus_debt_pct),
            (SurplusBucket::Goals, params.surplus_goal_pct),
            (SurplusBucket::Flexible, params.surplus_flexible_pct),
        ];
        debug!(surplus, "hybrid surplus split");

        // Phase 3: treat each bucket as its own level-picking problem
        let mut buckets = Vec::with_capacity(plan.len());
        for (bucket, share) in plan {
            let budget = surplus * share;
            let items = self.bucket_items(model, params, bucket);
            let spent = run_bucket(&items, budget, &mut amounts);
            buckets.push(BucketReport {
                bucket,
                budget,
                spent,
            });
        }

        Ok(HybridOutcome {
            amounts,
            buckets,
            feasible: true,
        })
    }

    fn bucket_items(
        &self,
        model: &ConstraintModel,
        params: &ScenarioParams,
        bucket: SurplusBucket,
    ) -> Vec<BucketItem> {
        let mut items = Vec::new();
        match bucket {
            SurplusBucket::Emergency | SurplusBucket::Goals => {
                let want_emergency = bucket == SurplusBucket::Emergency;
                for (id, goal) in &model.goals {
                    if (goal.category == "emergency") != want_emergency {
                        continue;
                    }
                    let mut target = goal.suggested_contribution * params.goal_contribution_factor;
                    let cap = if goal.remaining_amount > 0.0 {
                        target = target.min(goal.remaining_amount);
                        goal.remaining_amount
                    } else {
                        f64::INFINITY
                    };
                    items.push(BucketItem {
                        id: id.clone(),
                        cap,
                        levels: ladder(target, goal.weight),
                        priority: goal.priority,
                    });
                }
            }
            SurplusBucket::ExtraDebt => {
                for (id, debt) in &model.debts {
                    // A forced fixed payment leaves no room for extras
                    if debt.fixed_payment.is_some() {
                        continue;
                    }
                    let room = debt.balance - debt.committed_payment();
                    if room <= 0.0 {
                        continue;
                    }
                    // Higher interest earns a higher reward per ladder step
                    items.push(BucketItem {
                        id: id.clone(),
                        cap: room,
                        levels: ladder(room, 1.0 + debt.interest_rate),
                        priority: debt.priority,
                    });
                }
            }
            SurplusBucket::Flexible => {
                for (id, flexible) in &model.flexible {
                    let target = (flexible.maximum * params.flexible_level).max(flexible.minimum);
                    if target <= 0.0 {
                        continue;
                    }
                    let mut levels = Vec::new();
                    if flexible.minimum > 0.0 {
                        levels.push(TargetLevel {
                            threshold: flexible.minimum,
                            reward: 1.0,
                            label: "minimum".to_string(),
                        });
                    }
                    for (fraction, label, reward) in
                        [(0.5, "50%", 1.5), (0.75, "75%", 1.75), (1.0, "100%", 2.0)]
                    {
                        let threshold = target * fraction;
                        if threshold > flexible.minimum + 1e-9 {
                            levels.push(TargetLevel {
                                threshold,
                                reward,
                                label: label.to_string(),
                            });
                        }
                    }
                    items.push(BucketItem {
                        id: id.clone(),
                        cap: target,
                        levels,
                        priority: flexible.priority,
                    });
                }
            }
        }
        items.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        items
    }
}

/// Quarter-step reward ladder toward a target amount
fn ladder(target: f64, weight: f64) -> Vec<TargetLevel> {
    if target <= 0.0 {
        return Vec::new();
    }
    [(0.25, "25%"), (0.5, "50%"), (0.75, "75%"), (1.0, "100%")]
        .into_iter()
        .map(|(fraction, label)| TargetLevel {
            threshold: target * fraction,
            reward: fraction * weight,
            label: label.to_string(),
        })
        .collect()
}

/// Highest ladder level reached by an allocation
fn reached(levels: &[TargetLevel], allocated: f64) -> Option<usize> {
    let mut reached = None;
    for (i, level) in levels.iter().enumerate() {
        if allocated + 1e-9 >= level.threshold {
            reached = Some(i);
        }
    }
    reached
}

/// First pass: per item by priority, the highest affordable level.
/// Second pass: repeatedly apply the single best reward-per-cost upgrade
/// until the bucket budget runs dry.
///
/// Extras are tracked bucket-locally so that minimums already sitting in
/// `amounts` (debt payments, earlier buckets) never count against a ladder.
fn run_bucket(items: &[BucketItem], budget: f64, amounts: &mut BTreeMap<String, f64>) -> f64 {
    let mut remaining = budget;
    let mut extras: BTreeMap<&str, f64> = items.iter().map(|i| (i.id.as_str(), 0.0)).collect();

    for item in items {
        for level in item.levels.iter().rev() {
            if level.threshold <= remaining + 1e-9 && level.threshold <= item.cap + 1e-9 {
                extras.insert(item.id.as_str(), level.threshold);
                remaining -= level.threshold;
                break;
            }
        }
    }

    let mut passes = 0usize;
    while passes < MAX_UPGRADE_PASSES && remaining > BUDGET_TOLERANCE {
        let mut best: Option<(&BucketItem, f64, f64)> = None;
        for item in items {
            let current = extras[item.id.as_str()];
            let level_now = reached(&item.levels, current);
            let Some(next) = item.levels.get(level_now.map_or(0, |i| i + 1)) else {
                continue;
            };
            if next.threshold > item.cap + 1e-9 {
                continue;
            }
            let cost = next.threshold - current;
            if cost <= 1e-9 || cost > remaining + 1e-9 {
                continue;
            }
            let reward_now = level_now.map_or(0.0, |i| item.levels[i].reward);
            let gain = next.reward - reward_now;
            if gain <= 0.0 {
                continue;
            }
            let ratio = gain / cost;
            if best.is_none_or(|(_, r, _)| ratio > r) {
                best = Some((item, ratio, cost));
            }
        }
        let Some((item, _, cost)) = best else {
            break;
        };
        *extras.get_mut(item.id.as_str()).expect("bucket item") += cost;
        remaining -= cost;
        passes += 1;
    }

    for item in items {
        let extra = extras[item.id.as_str()];
        if extra > 0.0 {
            *amounts.entry(item.id.clone()).or_insert(0.0) += extra;
        }
    }

    budget - remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DebtConstraint, FlexibleConstraint, GoalConstraint, MandatoryConstraint,
    };

    fn sample_model() -> ConstraintModel {
        let mut model = ConstraintModel::new(20_000_000.0);
        model.add_mandatory("rent", MandatoryConstraint::fixed(5_000_000.0));
        model.add_debt(
            "card",
            DebtConstraint {
                minimum_payment: 1_000_000.0,
                balance: 10_000_000.0,
                interest_rate: 0.2,
                fixed_payment: None,
                priority: 1,
            },
        );
        model.add_goal(
            "emergency_fund",
            GoalConstraint {
                suggested_contribution: 3_000_000.0,
                remaining_amount: 30_000_000.0,
                priority: 1,
                weight: 1.0,
                category: "emergency".to_string(),
            },
        );
        model.add_goal(
            "vacation",
            GoalConstraint {
                suggested_contribution: 2_000_000.0,
                remaining_amount: 10_000_000.0,
                priority: 2,
                weight: 1.0,
                category: "travel".to_string(),
            },
        );
        model.add_flexible(
            "dining",
            FlexibleConstraint {
                minimum: 1_000_000.0,
                maximum: 3_000_000.0,
                priority: 3,
            },
        );
        model
    }

    #[test]
    fn test_minimums_come_first() {
        let outcome = HybridGp::new()
            .solve(&sample_model(), &ScenarioParams::default())
            .unwrap();

        assert_eq!(outcome.amounts["rent"], 5_000_000.0);
        // Minimum payment plus whatever the extra-debt bucket could afford
        assert!(outcome.amounts["card"] >= 1_000_000.0);
        assert!(outcome.feasible);
    }

    #[test]
    fn test_buckets_never_overspend() {
        let outcome = HybridGp::new()
            .solve(&sample_model(), &ScenarioParams::default())
            .unwrap();

        for report in &outcome.buckets {
            assert!(
                report.spent <= report.budget + BUDGET_TOLERANCE,
                "{:?} spent {} of {}",
                report.bucket,
                report.spent,
                report.budget
            );
        }
        let total: f64 = outcome.amounts.values().sum();
        assert!(total <= 20_000_000.0 + BUDGET_TOLERANCE);
    }

    #[test]
    fn test_emergency_goal_is_funded_from_its_bucket() {
        let outcome = HybridGp::new()
            .solve(&sample_model(), &ScenarioParams::default())
            .unwrap();

        // Emergency bucket is 30% of the 14M surplus; the 3M target fits
        assert!((outcome.amounts["emergency_fund"] - 3_000_000.0).abs() < 1.0);
        assert!((outcome.amounts["vacation"] - 2_000_000.0).abs() < 1.0);
    }

    #[test]
    fn test_fixed_payment_debt_gets_no_extra() {
        let mut model = sample_model();
        model.add_debt(
            "car",
            DebtConstraint {
                minimum_payment: 2_000_000.0,
                balance: 40_000_000.0,
                interest_rate: 0.05,
                fixed_payment: Some(2_500_000.0),
                priority: 2,
            },
        );

        let outcome = HybridGp::new()
            .solve(&model, &ScenarioParams::default())
            .unwrap();

        assert_eq!(outcome.amounts["car"], 2_500_000.0);
    }

    #[test]
    fn test_deficit_fails_with_the_shortfall() {
        let mut model = ConstraintModel::new(4_000_000.0);
        model.add_mandatory("rent", MandatoryConstraint::fixed(5_000_000.0));

        let result = HybridGp::new().solve(&model, &ScenarioParams::default());

        assert!(matches!(
            result,
            Err(EngineError::InfeasibleMinimums { required, available })
                if required == 5_000_000.0 && available == 4_000_000.0
        ));
    }
}
