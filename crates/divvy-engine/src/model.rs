use std::collections::BTreeMap;

use crate::error::EngineError;

/// A mandatory expense. `minimum == maximum` denotes a fixed amount.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MandatoryConstraint {
    pub minimum: f64,
    pub maximum: f64,
}

impl MandatoryConstraint {
    pub fn fixed(amount: f64) -> Self {
        Self {
            minimum: amount,
            maximum: amount,
        }
    }

    pub fn is_fixed(&self) -> bool {
        (self.maximum - self.minimum).abs() < f64::EPSILON
    }
}

/// A flexible spending category with an adjustable range
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FlexibleConstraint {
    pub minimum: f64,
    pub maximum: f64,
    /// Lower integer = higher priority
    pub priority: u32,
}

/// A debt obligation. A forced `fixed_payment` overrides the minimum.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DebtConstraint {
    pub minimum_payment: f64,
    pub balance: f64,
    pub interest_rate: f64,
    pub fixed_payment: Option<f64>,
    pub priority: u32,
}

impl DebtConstraint {
    /// The payment the heuristic layer commits to, before any extra-debt
    /// surplus is considered
    pub fn committed_payment(&self) -> f64 {
        self.fixed_payment.unwrap_or(self.minimum_payment)
    }
}

/// A savings goal
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct GoalConstraint {
    /// Contribution the surrounding application suggests for this period
    pub suggested_contribution: f64,
    /// Amount still missing to complete the goal; 0 means open-ended
    pub remaining_amount: f64,
    /// Lower integer = higher priority
    pub priority: u32,
    /// Tie-breaker multiplier within a priority tier
    pub weight: f64,
    /// Free-form category; "emergency" routes the emergency surplus bucket
    pub category: String,
}

/// Everything the engine needs to compute one allocation
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstraintModel {
    pub income: f64,
    pub mandatory: BTreeMap<String, MandatoryConstraint>,
    pub flexible: BTreeMap<String, FlexibleConstraint>,
    pub debts: BTreeMap<String, DebtConstraint>,
    pub goals: BTreeMap<String, GoalConstraint>,
}

impl ConstraintModel {
    pub fn new(income: f64) -> Self {
        Self {
            income,
            ..Self::default()
        }
    }

    pub fn add_mandatory(&mut self, id: impl Into<String>, constraint: MandatoryConstraint) {
        self.mandatory.insert(id.into(), constraint);
    }

    pub fn add_flexible(&mut self, id: impl Into<String>, constraint: FlexibleConstraint) {
        self.flexible.insert(id.into(), constraint);
    }

    pub fn add_debt(&mut self, id: impl Into<String>, constraint: DebtConstraint) {
        self.debts.insert(id.into(), constraint);
    }

    pub fn add_goal(&mut self, id: impl Into<String>, constraint: GoalConstraint) {
        self.goals.insert(id.into(), constraint);
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty()
            && self.flexible.is_empty()
            && self.debts.is_empty()
            && self.goals.is_empty()
    }

    /// The amount the heuristic layer will commit before any solver runs
    pub fn committed_minimums(&self) -> f64 {
        let mandatory: f64 = self.mandatory.values().map(|m| m.minimum).sum();
        let debts: f64 = self.debts.values().map(|d| d.committed_payment()).sum();
        mandatory + debts
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.income < 0.0 {
            return Err(EngineError::InvalidModel(format!(
                "income must be non-negative, got {}",
                self.income
            )));
        }
        for (id, m) in &self.mandatory {
            if m.minimum < 0.0 || m.maximum < 0.0 {
                return Err(EngineError::InvalidModel(format!(
                    "mandatory '{id}' has a negative bound"
                )));
            }
            if m.minimum > m.maximum {
                return Err(EngineError::InvalidModel(format!(
                    "mandatory '{id}' has minimum above maximum"
                )));
            }
        }
        for (id, f) in &self.flexible {
            if f.minimum < 0.0 || f.maximum < 0.0 {
                return Err(EngineError::InvalidModel(format!(
                    "flexible '{id}' has a negative bound"
                )));
            }
            if f.minimum > f.maximum {
                return Err(EngineError::InvalidModel(format!(
                    "flexible '{id}' has minimum above maximum"
                )));
            }
        }
        for (id, d) in &self.debts {
            if d.minimum_payment < 0.0
                || d.balance < 0.0
                || d.interest_rate < 0.0
                || d.fixed_payment.is_some_and(|p| p < 0.0)
            {
                return Err(EngineError::InvalidModel(format!(
                    "debt '{id}' has a negative value"
                )));
            }
        }
        for (id, g) in &self.goals {
            if g.suggested_contribution < 0.0 || g.remaining_amount < 0.0 || g.weight < 0.0 {
                return Err(EngineError::InvalidModel(format!(
                    "goal '{id}' has a negative value"
                )));
            }
        }
        Ok(())
    }
}

/// Tunable knobs supplied alongside the model
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioParams {
    /// Scales every goal's suggested contribution into its solve target
    pub goal_contribution_factor: f64,
    /// Fraction of each flexible maximum made available, in [0, 1]
    pub flexible_level: f64,
    /// Surplus share routed to emergency goals
    pub surplus_emergency_pct: f64,
    /// Surplus share routed to extra debt payments
    pub surplus_debt_pct: f64,
    /// Surplus share routed to other goals
    pub surplus_goal_pct: f64,
    /// Surplus share routed to flexible categories
    pub surplus_flexible_pct: f64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            goal_contribution_factor: 1.0,
            flexible_level: 1.0,
            surplus_emergency_pct: 0.3,
            surplus_debt_pct: 0.2,
            surplus_goal_pct: 0.3,
            surplus_flexible_pct: 0.2,
        }
    }
}

impl ScenarioParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.goal_contribution_factor < 0.0 {
            return Err(EngineError::InvalidModel(
                "goal contribution factor must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.flexible_level) {
            return Err(EngineError::InvalidModel(format!(
                "flexible level must be in [0, 1], got {}",
                self.flexible_level
            )));
        }
        let shares = [
            self.surplus_emergency_pct,
            self.surplus_debt_pct,
            self.surplus_goal_pct,
            self.surplus_flexible_pct,
        ];
        if shares.iter().any(|&s| s < 0.0) {
            return Err(EngineError::InvalidModel(
                "surplus shares must be non-negative".to_string(),
            ));
        }
        let total: f64 = shares.iter().sum();
        if total > 1.0 + 1e-9 {
            return Err(EngineError::InvalidModel(format!(
                "surplus shares sum to {total}, must not exceed 1"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_mandatory() {
        let rent = MandatoryConstraint::fixed(5_000_000.0);
        assert!(rent.is_fixed());
        assert_eq!(rent.minimum, rent.maximum);
    }

    #[test]
    fn test_committed_minimums() {
        let mut model = ConstraintModel::new(20_000_000.0);
        model.add_mandatory("rent", MandatoryConstraint::fixed(5_000_000.0));
        model.add_debt(
            "card",
            DebtConstraint {
                minimum_payment: 1_000_000.0,
                balance: 10_000_000.0,
                interest_rate: 0.24,
                fixed_payment: None,
                priority: 1,
            },
        );
        model.add_debt(
            "car",
            DebtConstraint {
                minimum_payment: 2_000_000.0,
                balance: 50_000_000.0,
                interest_rate: 0.08,
                fixed_payment: Some(3_000_000.0),
                priority: 2,
            },
        );

        assert_eq!(model.committed_minimums(), 9_000_000.0);
    }

    #[test]
    fn test_validate_rejects_negative_income() {
        let model = ConstraintModel::new(-1.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut model = ConstraintModel::new(1000.0);
        model.add_flexible(
            "fun",
            FlexibleConstraint {
                minimum: 500.0,
                maximum: 100.0,
                priority: 3,
            },
        );
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_params_share_sum_checked() {
        let params = ScenarioParams {
            surplus_emergency_pct: 0.6,
            surplus_debt_pct: 0.6,
            ..ScenarioParams::default()
        };
        assert!(params.validate().is_err());
        assert!(ScenarioParams::default().validate().is_ok());
    }
}
