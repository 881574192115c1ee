use crate::problem::LpProblem;
use crate::simplex::Solver;
use crate::solution::{Solution, SolutionStatus};

/// Options for the branch-and-bound MILP search
#[derive(Debug, Clone)]
pub struct MilpOptions {
    /// Maximum number of nodes to explore
    pub max_nodes: usize,
    /// Tolerance for integer feasibility
    pub int_tol: f64,
}

impl Default for MilpOptions {
    fn default() -> Self {
        Self {
            max_nodes: 10_000,
            int_tol: 1e-6,
        }
    }
}

/// Solve a problem with binary variables by depth-first branch-and-bound
/// over the simplex relaxation.
///
/// Problems without binary variables degrade to a single simplex solve.
pub fn solve_milp(problem: &LpProblem, solver: &Solver, options: &MilpOptions) -> Solution {
    if !problem.is_mixed_integer() {
        return solver.solve(problem);
    }

    let mut stack: Vec<Vec<(f64, f64)>> = vec![problem.bounds.clone()];
    let mut incumbent: Option<Solution> = None;
    let mut nodes = 0usize;
    let mut capped = false;

    while let Some(bounds) = stack.pop() {
        if nodes >= options.max_nodes {
            capped = true;
            break;
        }
        nodes += 1;

        let mut relaxation = problem.clone();
        relaxation.bounds = bounds;
        let candidate = solver.solve(&relaxation);

        match candidate.status {
            SolutionStatus::Optimal => {}
            SolutionStatus::Unbounded if nodes == 1 => return Solution::unbounded(nodes),
            // Infeasible subtree, or a relaxation the simplex could not
            // finish: nothing to branch on
            _ => continue,
        }

        // The relaxation objective bounds everything below this node
        if let Some(ref best) = incumbent {
            if !improves(candidate.objective_value, best.objective_value, problem.objective.minimize) {
                continue;
            }
        }

        match most_fractional_binary(problem, &candidate.values, options.int_tol) {
            None => {
                let mut solution = candidate;
                solution.iterations = nodes;
                incumbent = Some(solution);
            }
            Some((var, value)) => {
                let zero = branch_bounds(&relaxation.bounds, var, 0.0);
                let one = branch_bounds(&relaxation.bounds, var, 1.0);
                // Explore the side the relaxation leans toward first
                if value >= 0.5 {
                    stack.push(zero);
                    stack.push(one);
                } else {
                    stack.push(one);
                    stack.push(zero);
                }
            }
        }
    }

    match incumbent {
        Some(mut solution) => {
            if capped {
                solution.status = SolutionStatus::IterationLimit;
            }
            solution.iterations = nodes;
            solution
        }
        None if capped => Solution::iteration_limit(Vec::new(), 0.0, nodes),
        None => Solution::infeasible(nodes),
    }
}

fn improves(candidate: f64, best: f64, minimize: bool) -> bool {
    if minimize {
        candidate < best - 1e-9
    } else {
        candidate > best + 1e-9
    }
}

/// The binary variable whose relaxed value sits closest to 0.5
fn most_fractional_binary(problem: &LpProblem, values: &[f64], int_tol: f64) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    let mut best_distance = f64::INFINITY;

    for (j, &is_binary) in problem.binary.iter().enumerate() {
        if !is_binary {
            continue;
        }
        let value = values.get(j).copied().unwrap_or(0.0);
        let fractional = (value - value.round()).abs();
        if fractional <= int_tol {
            continue;
        }
        let distance = (value - 0.5).abs();
        if distance < best_distance {
            best_distance = distance;
            best = Some((j, value));
        }
    }

    best
}

fn branch_bounds(bounds: &[(f64, f64)], var: usize, fixed: f64) -> Vec<(f64, f64)> {
    let mut branched = bounds.to_vec();
    branched[var] = (fixed, fixed);
    branched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ConstraintOp;

    #[test]
    fn test_pure_lp_passthrough() {
        let mut problem = LpProblem::new(vec!["x".to_string()]);
        problem.set_objective(vec![1.0], false);
        problem.add_constraint("cap", vec![1.0], ConstraintOp::Le, 5.0);

        let solution = solve_milp(&problem, &Solver::new(), &MilpOptions::default());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert!((solution.values[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_binary_knapsack() {
        // Pick items maximizing value 6b0 + 5b1 + 4b2 with weights
        // 5b0 + 4b1 + 3b2 <= 8; best is b0 + b2 (value 10, weight 8)
        let mut problem = LpProblem::new(vec!["b0".into(), "b1".into(), "b2".into()]);
        problem.set_objective(vec![6.0, 5.0, 4.0], false);
        problem.add_constraint("weight", vec![5.0, 4.0, 3.0], ConstraintOp::Le, 8.0);
        for j in 0..3 {
            problem.set_binary(j);
        }

        let solution = solve_milp(&problem, &Solver::new(), &MilpOptions::default());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert!((solution.values[0] - 1.0).abs() < 1e-6);
        assert!(solution.values[1].abs() < 1e-6);
        assert!((solution.values[2] - 1.0).abs() < 1e-6);
        assert!((solution.objective_value - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_exactly_one_selector() {
        // Maximize 2b0 + 3b1 with b0 + b1 = 1: picks b1
        let mut problem = LpProblem::new(vec!["b0".into(), "b1".into()]);
        problem.set_objective(vec![2.0, 3.0], false);
        problem.add_constraint("pick_one", vec![1.0, 1.0], ConstraintOp::Eq, 1.0);
        problem.set_binary(0);
        problem.set_binary(1);

        let solution = solve_milp(&problem, &Solver::new(), &MilpOptions::default());

        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert!(solution.values[0].abs() < 1e-6);
        assert!((solution.values[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_milp() {
        let mut problem = LpProblem::new(vec!["b0".into()]);
        problem.set_objective(vec![1.0], false);
        problem.add_constraint("impossible", vec![1.0], ConstraintOp::Ge, 2.0);
        problem.set_binary(0);

        let solution = solve_milp(&problem, &Solver::new(), &MilpOptions::default());

        assert_eq!(solution.status, SolutionStatus::Infeasible);
    }
}
