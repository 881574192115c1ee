//! Turns satisfaction curves into MILP constraints.
//!
//! Each goal's curve is decomposed into contiguous linear segments with one
//! binary "segment active" selector per segment. Exactly one selector is 1,
//! and the decision variable is tied to the active segment with big-M
//! disjunctive rows (`value >= lower * b` and `value <= upper + M * (1 - b)`
//! for every segment simultaneously). M is bound to the solve budget rather
//! than an arbitrary large literal.
//!
//! The objective uses the exact linear term of the active segment: a helper
//! variable per segment carries the distance travelled into it, so the
//! objective reads the true membership value instead of a midpoint estimate.

use std::collections::BTreeMap;

use divvy_solver::{ConstraintOp, LpProblem, MilpBackend};

use crate::membership::Segment;
use crate::program::{priority_scale, DecisionVariable, FuzzyGoal, LevelGoal};

/// An assembled MILP plus the mapping from item IDs back to columns
#[derive(Debug, Clone)]
pub struct EncodedProblem {
    pub problem: LpProblem,
    pub var_index: BTreeMap<String, usize>,
}

impl EncodedProblem {
    /// Read the allocation for each decision variable out of a solution
    /// vector, discarding selector/helper columns
    pub fn amounts(&self, values: &[f64]) -> BTreeMap<String, f64> {
        self.var_index
            .iter()
            .map(|(id, &j)| (id.clone(), values.get(j).copied().unwrap_or(0.0).max(0.0)))
            .collect()
    }
}

/// Build the MILP for a set of continuous-satisfaction goals
pub fn build_fuzzy_milp(
    variables: &[DecisionVariable],
    goals: &[FuzzyGoal],
    budget: f64,
) -> EncodedProblem {
    let n_items = variables.len();
    let big_m = budget.max(1.0);
    let max_priority = goals.iter().map(|g| g.priority).max().unwrap_or(0);

    let bounds: BTreeMap<&str, (f64, f64)> = variables
        .iter()
        .map(|v| (v.id.as_str(), (v.lower, v.solver_upper(budget))))
        .collect();

    // Segment coverage per goal, then the full column list
    let goal_segments: Vec<Vec<Segment>> = goals
        .iter()
        .map(|g| {
            let upper = bounds.get(g.variable.as_str()).map_or(budget, |b| b.1);
            coverage_segments(g.membership.segments(), upper)
        })
        .collect();

    let mut names: Vec<String> = variables.iter().map(|v| v.id.clone()).collect();
    let mut selector_start = Vec::with_capacity(goals.len());
    let mut travel_start = Vec::with_capacity(goals.len());
    for (gi, (goal, segments)) in goals.iter().zip(&goal_segments).enumerate() {
        selector_start.push(names.len());
        for k in 0..segments.len() {
            names.push(format!("{}_g{gi}_b{k}", goal.variable));
        }
        travel_start.push(names.len());
        for k in 0..segments.len() {
            names.push(format!("{}_g{gi}_y{k}", goal.variable));
        }
    }

    let mut problem = LpProblem::new(names);
    let n_cols = problem.num_variables();

    // Budget row over the decision variables only
    let mut budget_row = vec![0.0; n_cols];
    for j in 0..n_items {
        budget_row[j] = 1.0;
    }
    problem.add_constraint("budget", budget_row, ConstraintOp::Le, budget);

    let var_index: BTreeMap<String, usize> = variables
        .iter()
        .enumerate()
        .map(|(j, v)| (v.id.clone(), j))
        .collect();
    for (j, variable) in variables.iter().enumerate() {
        let (lower, upper) = bounds[variable.id.as_str()];
        problem.set_bounds(j, lower, upper);
    }

    let mut objective = vec![0.0; n_cols];

    for (gi, (goal, segments)) in goals.iter().zip(&goal_segments).enumerate() {
        let Some(&item) = var_index.get(&goal.variable) else {
            continue;
        };
        let scale = goal.weight * priority_scale(goal.priority, max_priority);
        let b0 = selector_start[gi];
        let y0 = travel_start[gi];

        // Exactly one segment is active
        let mut pick_one = vec![0.0; n_cols];
        for k in 0..segments.len() {
            pick_one[b0 + k] = 1.0;
        }
        problem.add_constraint(
            format!("{}_g{gi}_one", goal.variable),
            pick_one,
            ConstraintOp::Eq,
            1.0,
        );

        // The decision variable equals the active segment's lower edge plus
        // the travel into it
        let mut definition = vec![0.0; n_cols];
        definition[item] = 1.0;
        for (k, segment) in segments.iter().enumerate() {
            definition[b0 + k] = -segment.lower;
            definition[y0 + k] = -1.0;
        }
        problem.add_constraint(
            format!("{}_g{gi}_def", goal.variable),
            definition,
            ConstraintOp::Eq,
            0.0,
        );

        for (k, segment) in segments.iter().enumerate() {
            problem.set_binary(b0 + k);

            // value >= lower * b
            let mut floor_row = vec![0.0; n_cols];
            floor_row[item] = 1.0;
            floor_row[b0 + k] = -segment.lower;
            problem.add_constraint(
                format!("{}_g{gi}_lo{k}", goal.variable),
                floor_row,
                ConstraintOp::Ge,
                0.0,
            );

            // value <= upper + M * (1 - b)
            let mut ceil_row = vec![0.0; n_cols];
            ceil_row[item] = 1.0;
            ceil_row[b0 + k] = big_m;
            problem.add_constraint(
                format!("{}_g{gi}_hi{k}", goal.variable),
                ceil_row,
                ConstraintOp::Le,
                segment.upper + big_m,
            );

            // Travel is confined to the active segment's span
            let span = (segment.upper - segment.lower).max(0.0);
            let mut travel_row = vec![0.0; n_cols];
            travel_row[y0 + k] = 1.0;
            travel_row[b0 + k] = -span;
            problem.add_constraint(
                format!("{}_g{gi}_tr{k}", goal.variable),
                travel_row,
                ConstraintOp::Le,
                0.0,
            );
            problem.set_bounds(y0 + k, 0.0, span);

            // Exact membership of the active segment: value at its lower
            // edge plus slope * travel
            objective[b0 + k] = segment.value_at(segment.lower) * scale;
            objective[y0 + k] = segment.slope * scale;
        }
    }

    problem.set_objective(objective, false);
    EncodedProblem { problem, var_index }
}

/// Build the MILP for goals rewarded at discrete levels: at most one level
/// selector per goal, reward earned only when the allocation reaches the
/// level's threshold
pub fn build_level_milp(
    variables: &[DecisionVariable],
    goals: &[LevelGoal],
    budget: f64,
) -> EncodedProblem {
    let n_items = variables.len();
    let max_priority = goals.iter().map(|g| g.priority).max().unwrap_or(0);

    let mut names: Vec<String> = variables.iter().map(|v| v.id.clone()).collect();
    let mut selector_start = Vec::with_capacity(goals.len());
    for (gi, goal) in goals.iter().enumerate() {
        selector_start.push(names.len());
        for k in 0..goal.levels.len() {
            names.push(format!("{}_g{gi}_l{k}", goal.variable));
        }
    }

    let mut problem = LpProblem::new(names);
    let n_cols = problem.num_variables();

    let mut budget_row = vec![0.0; n_cols];
    for j in 0..n_items {
        budget_row[j] = 1.0;
    }
    problem.add_constraint("budget", budget_row, ConstraintOp::Le, budget);

    let var_index: BTreeMap<String, usize> = variables
        .iter()
        .enumerate()
        .map(|(j, v)| (v.id.clone(), j))
        .collect();
    for (j, variable) in variables.iter().enumerate() {
        problem.set_bounds(j, variable.lower, variable.solver_upper(budget));
    }

    let mut objective = vec![0.0; n_cols];

    for (gi, goal) in goals.iter().enumerate() {
        let Some(&item) = var_index.get(&goal.variable) else {
            continue;
        };
        let scale = goal.weight * priority_scale(goal.priority, max_priority);
        let b0 = selector_start[gi];

        // At most one level per goal
        let mut pick = vec![0.0; n_cols];
        for k in 0..goal.levels.len() {
            pick[b0 + k] = 1.0;
        }
        problem.add_constraint(
            format!("{}_g{gi}_one", goal.variable),
            pick,
            ConstraintOp::Le,
            1.0,
        );

        for (k, level) in goal.levels.iter().enumerate() {
            problem.set_binary(b0 + k);

            // Selecting a level forces the allocation up to its threshold
            let mut reach = vec![0.0; n_cols];
            reach[item] = 1.0;
            reach[b0 + k] = -level.threshold;
            problem.add_constraint(
                format!("{}_g{gi}_reach{k}", goal.variable),
                reach,
                ConstraintOp::Ge,
                0.0,
            );

            objective[b0 + k] = level.reward * scale;
        }
    }

    problem.set_objective(objective, false);
    EncodedProblem { problem, var_index }
}

/// Feed an assembled problem into a backend through its abstract contract
pub fn load_backend(backend: &mut dyn MilpBackend, problem: &LpProblem) {
    backend.set_objective(&problem.objective.coefficients, !problem.objective.minimize);
    for constraint in &problem.constraints {
        backend.add_constraint(&constraint.coefficients, constraint.op, constraint.rhs);
    }
    for (j, &(lower, upper)) in problem.bounds.iter().enumerate() {
        backend.set_bounds(j, lower, upper);
    }
    for (j, &is_binary) in problem.binary.iter().enumerate() {
        if is_binary {
            backend.set_binary(j);
        }
    }
}

/// Extend a curve's segments so that every value in `[0, upper_limit]` falls
/// in exactly one segment: a zero-membership prefix below the curve and a
/// flat extension at the final cap above it
fn coverage_segments(mut segments: Vec<Segment>, upper_limit: f64) -> Vec<Segment> {
    if let Some(first) = segments.first() {
        if first.lower > 1e-9 {
            segments.insert(
                0,
                Segment {
                    lower: 0.0,
                    upper: first.lower,
                    slope: 0.0,
                    intercept: 0.0,
                    cap: 0.0,
                },
            );
        }
    }
    // Segments entirely out of reach only bloat the search tree
    segments.retain(|s| s.lower < upper_limit + 1e-9);
    if segments.is_empty() {
        segments.push(Segment {
            lower: 0.0,
            upper: upper_limit,
            slope: 0.0,
            intercept: 0.0,
            cap: 0.0,
        });
    }
    let last = segments[segments.len() - 1];
    if last.upper < upper_limit - 1e-9 {
        // Extend flat at the membership the curve ends on (a falling edge
        // ends at 0, a monotone curve at its final cap)
        let tail = last.value_at(last.upper);
        segments.push(Segment {
            lower: last.upper,
            upper: upper_limit,
            slope: 0.0,
            intercept: tail,
            cap: tail,
        });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipFunction;
    use crate::program::{TargetLevel, VariableKind};
    use divvy_solver::{solve_milp, MilpOptions, Solver};

    fn goal_var(id: &str) -> DecisionVariable {
        DecisionVariable::new(id, VariableKind::Goal, 0.0, 0.0)
    }

    #[test]
    fn test_fuzzy_milp_reaches_the_peak() {
        let variables = vec![goal_var("save")];
        let goals = vec![FuzzyGoal {
            variable: "save".to_string(),
            membership: MembershipFunction::Triangular {
                lower: 0.0,
                peak: 1_000.0,
                upper: 2_000.0,
            },
            priority: 1,
            weight: 1.0,
        }];

        let encoded = build_fuzzy_milp(&variables, &goals, 5_000.0);
        let solution = solve_milp(&encoded.problem, &Solver::new(), &MilpOptions::default());

        assert!(solution.is_optimal());
        let amounts = encoded.amounts(&solution.values);
        assert!(
            (amounts["save"] - 1_000.0).abs() < 1e-6,
            "allocated {}",
            amounts["save"]
        );
    }

    #[test]
    fn test_fuzzy_milp_respects_budget() {
        let variables = vec![goal_var("a"), goal_var("b")];
        let goals = vec![
            FuzzyGoal {
                variable: "a".to_string(),
                membership: MembershipFunction::Triangular {
                    lower: 0.0,
                    peak: 1_000.0,
                    upper: 2_000.0,
                },
                priority: 1,
                weight: 1.0,
            },
            FuzzyGoal {
                variable: "b".to_string(),
                membership: MembershipFunction::Triangular {
                    lower: 0.0,
                    peak: 700.0,
                    upper: 1_400.0,
                },
                priority: 2,
                weight: 1.0,
            },
        ];

        let encoded = build_fuzzy_milp(&variables, &goals, 1_000.0);
        let solution = solve_milp(&encoded.problem, &Solver::new(), &MilpOptions::default());

        assert!(solution.is_optimal());
        let amounts = encoded.amounts(&solution.values);
        let total = amounts["a"] + amounts["b"];
        assert!(total <= 1_000.0 + 1e-6);
        // The higher-priority goal dominates the scarce budget
        assert!(amounts["a"] > amounts["b"]);
    }

    #[test]
    fn test_level_milp_picks_best_affordable_level() {
        let variables = vec![goal_var("fund")];
        let goals = vec![LevelGoal {
            variable: "fund".to_string(),
            levels: vec![
                TargetLevel {
                    threshold: 500.0,
                    reward: 1.0,
                    label: "half".to_string(),
                },
                TargetLevel {
                    threshold: 1_000.0,
                    reward: 3.0,
                    label: "full".to_string(),
                },
            ],
            priority: 1,
            weight: 1.0,
        }];

        let encoded = build_level_milp(&variables, &goals, 800.0);
        let solution = solve_milp(&encoded.problem, &Solver::new(), &MilpOptions::default());

        assert!(solution.is_optimal());
        let amounts = encoded.amounts(&solution.values);
        // Only the 500 level is affordable under a budget of 800: the
        // allocation must reach its threshold without breaking the budget
        assert!(amounts["fund"] >= 500.0 - 1e-6);
        assert!(amounts["fund"] <= 800.0 + 1e-6);
    }

    #[test]
    fn test_coverage_is_contiguous_from_zero() {
        let segments = coverage_segments(
            vec![Segment {
                lower: 200.0,
                upper: 400.0,
                slope: 0.005,
                intercept: -1.0,
                cap: 1.0,
            }],
            1_000.0,
        );

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].lower, 0.0);
        assert_eq!(segments[0].cap, 0.0);
        assert_eq!(segments[2].upper, 1_000.0);
        assert_eq!(segments[2].cap, 1.0);
    }
}
