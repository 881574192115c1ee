use crate::problem::{ConstraintOp, LpProblem};
use crate::solution::{Solution, SolutionStatus};

/// Simplex solver for linear programming problems
pub struct Solver {
    /// Maximum pivots across both phases before giving up
    max_iterations: usize,
    /// Tolerance for floating point comparisons
    tolerance: f64,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
        }
    }
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// Solve the LP problem using the two-phase simplex method
    pub fn solve(&self, problem: &LpProblem) -> Solution {
        if problem.num_variables() == 0 {
            return Solution {
                status: SolutionStatus::Optimal,
                values: Vec::new(),
                objective_value: 0.0,
                iterations: 0,
            };
        }

        // With no constraint rows every variable sits at whichever bound
        // its objective coefficient favors
        let rows = self.collect_rows(problem);
        if rows.is_empty() {
            return self.solve_by_bounds(problem);
        }

        let mut tableau = self.build_tableau(problem, &rows);
        let mut iterations = 0usize;

        // Phase 1: drive artificial variables out of the basis
        if tableau.has_artificial {
            match self.phase1(&mut tableau, &mut iterations) {
                PhaseOutcome::Done => {}
                PhaseOutcome::Infeasible => return Solution::infeasible(iterations),
                PhaseOutcome::IterationLimit => {
                    let (values, objective) = self.extract(&tableau, problem);
                    return Solution::iteration_limit(values, objective, iterations);
                }
            }
        }

        // Phase 2: optimize the true objective with the phase-1 basis retained
        match self.phase2(&mut tableau, &mut iterations) {
            PhaseOutcome::Done => {}
            PhaseOutcome::Infeasible => return Solution::unbounded(iterations),
            PhaseOutcome::IterationLimit => {
                let (values, objective) = self.extract(&tableau, problem);
                return Solution::iteration_limit(values, objective, iterations);
            }
        }

        let (values, objective_value) = self.extract(&tableau, problem);
        Solution {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            iterations,
        }
    }

    /// Constraint rows plus one row per finite variable bound.
    /// Simplex variables are non-negative, so a zero lower bound needs no row.
    fn collect_rows(&self, problem: &LpProblem) -> Vec<Row> {
        let n = problem.num_variables();
        let mut rows: Vec<Row> = problem
            .constraints
            .iter()
            .map(|c| Row {
                coefficients: c.coefficients.clone(),
                op: c.op,
                rhs: c.rhs,
            })
            .collect();

        for (j, &(lower, upper)) in problem.bounds.iter().enumerate() {
            if lower > self.tolerance {
                let mut coefficients = vec![0.0; n];
                coefficients[j] = 1.0;
                rows.push(Row {
                    coefficients,
                    op: ConstraintOp::Ge,
                    rhs: lower,
                });
            }
            if upper.is_finite() {
                let mut coefficients = vec![0.0; n];
                coefficients[j] = 1.0;
                rows.push(Row {
                    coefficients,
                    op: ConstraintOp::Le,
                    rhs: upper,
                });
            }
        }

        rows
    }

    /// Direct optimum for a problem with no constraint rows at all
    fn solve_by_bounds(&self, problem: &LpProblem) -> Solution {
        let mut values = Vec::with_capacity(problem.num_variables());
        for (j, &coef) in problem.objective.coefficients.iter().enumerate() {
            let (lower, upper) = problem.bounds[j];
            let wants_upper = if problem.objective.minimize {
                coef < -self.tolerance
            } else {
                coef > self.tolerance
            };
            if wants_upper {
                if !upper.is_finite() {
                    return Solution::unbounded(0);
                }
                values.push(upper);
            } else {
                values.push(lower);
            }
        }

        let objective_value = dot(&problem.objective.coefficients, &values);
        Solution {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            iterations: 0,
        }
    }

    fn build_tableau(&self, problem: &LpProblem, rows: &[Row]) -> Tableau {
        let n_vars = problem.num_variables();
        let n_rows = rows.len();

        let mut n_slack = 0;
        let mut n_artificial = 0;
        for row in rows {
            match row.op {
                ConstraintOp::Le => n_slack += 1,
                ConstraintOp::Ge => {
                    n_slack += 1; // surplus
                    n_artificial += 1;
                }
                ConstraintOp::Eq => n_artificial += 1,
            }
        }

        let total_cols = n_vars + n_slack + n_artificial + 1; // +1 for RHS
        let mut tableau = Tableau {
            data: vec![vec![0.0; total_cols]; n_rows + 1],
            basic_vars: vec![0; n_rows],
            n_vars,
            n_slack,
            n_artificial,
            has_artificial: n_artificial > 0,
        };

        let mut slack_idx = n_vars;
        let mut artificial_idx = n_vars + n_slack;

        for (i, row) in rows.iter().enumerate() {
            for (j, &coef) in row.coefficients.iter().enumerate() {
                tableau.data[i][j] = coef;
            }

            // Normalize negative RHS by negating the row
            let mut rhs = row.rhs;
            let mut flipped = false;
            if rhs < 0.0 {
                rhs = -rhs;
                flipped = true;
                for j in 0..n_vars {
                    tableau.data[i][j] = -tableau.data[i][j];
                }
            }
            tableau.data[i][total_cols - 1] = rhs;

            match row.op {
                ConstraintOp::Le => {
                    tableau.data[i][slack_idx] = if flipped { -1.0 } else { 1.0 };
                    tableau.basic_vars[i] = slack_idx;
                    slack_idx += 1;
                }
                ConstraintOp::Ge => {
                    tableau.data[i][slack_idx] = if flipped { 1.0 } else { -1.0 };
                    slack_idx += 1;
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
                ConstraintOp::Eq => {
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
            }
        }

        // The objective row stores reduced costs for a maximization pass,
        // so minimization negates its coefficients
        for (j, &coef) in problem.objective.coefficients.iter().enumerate() {
            tableau.data[n_rows][j] = if problem.objective.minimize { -coef } else { coef };
        }

        tableau
    }

    fn phase1(&self, tableau: &mut Tableau, iterations: &mut usize) -> PhaseOutcome {
        let n_rows = tableau.data.len() - 1;
        let n_cols = tableau.data[0].len();
        let art_start = tableau.n_vars + tableau.n_slack;

        let original_objective = tableau.data[n_rows].clone();

        // Auxiliary objective: maximize -sum(artificials) == minimize sum
        for j in 0..n_cols {
            tableau.data[n_rows][j] = 0.0;
        }
        for j in art_start..(art_start + tableau.n_artificial) {
            tableau.data[n_rows][j] = -1.0;
        }

        // Cancel the -1 coefficients of artificials already in the basis
        for i in 0..n_rows {
            if tableau.basic_vars[i] >= art_start {
                for j in 0..n_cols {
                    tableau.data[n_rows][j] += tableau.data[i][j];
                }
            }
        }

        match self.run_pivots(tableau, n_cols - 1, iterations) {
            PhaseOutcome::Done => {}
            // Unbounded auxiliary problem means the original is infeasible
            PhaseOutcome::Infeasible => return PhaseOutcome::Infeasible,
            PhaseOutcome::IterationLimit => return PhaseOutcome::IterationLimit,
        }

        // A basic artificial with non-zero value means no feasible point exists
        let rhs_col = n_cols - 1;
        for i in 0..n_rows {
            if tableau.basic_vars[i] >= art_start && tableau.data[i][rhs_col].abs() > self.tolerance
            {
                return PhaseOutcome::Infeasible;
            }
        }

        // Restore the true objective, re-expressed in the current basis
        tableau.data[n_rows] = original_objective;
        for i in 0..n_rows {
            let basic = tableau.basic_vars[i];
            let ratio = tableau.data[n_rows][basic];
            if ratio.abs() > self.tolerance {
                for j in 0..n_cols {
                    tableau.data[n_rows][j] -= ratio * tableau.data[i][j];
                }
            }
        }

        PhaseOutcome::Done
    }

    fn phase2(&self, tableau: &mut Tableau, iterations: &mut usize) -> PhaseOutcome {
        // Artificial columns must never re-enter the basis
        let exclude_from = tableau.n_vars + tableau.n_slack;
        self.run_pivots(tableau, exclude_from, iterations)
    }

    /// Pivot until optimal, unbounded (reported as Infeasible to the caller's
    /// phase), or the shared iteration budget runs out
    fn run_pivots(&self, tableau: &mut Tableau, n_cols: usize, iterations: &mut usize) -> PhaseOutcome {
        loop {
            if *iterations >= self.max_iterations {
                return PhaseOutcome::IterationLimit;
            }
            let Some(pivot_col) = self.find_pivot_column(tableau, n_cols) else {
                return PhaseOutcome::Done;
            };
            let Some(pivot_row) = self.find_pivot_row(tableau, pivot_col) else {
                return PhaseOutcome::Infeasible;
            };
            self.pivot(tableau, pivot_row, pivot_col);
            *iterations += 1;
        }
    }

    /// Entering variable: the column with the best reduced cost
    fn find_pivot_column(&self, tableau: &Tableau, n_cols: usize) -> Option<usize> {
        let obj_row = tableau.data.len() - 1;
        let mut best_val = self.tolerance;
        let mut best_col = None;

        for j in 0..n_cols {
            if tableau.data[obj_row][j] > best_val {
                best_val = tableau.data[obj_row][j];
                best_col = Some(j);
            }
        }

        best_col
    }

    /// Leaving variable: minimum-ratio test over positive pivot entries
    fn find_pivot_row(&self, tableau: &Tableau, col: usize) -> Option<usize> {
        let n_rows = tableau.data.len() - 1;
        let rhs_col = tableau.data[0].len() - 1;

        let mut min_ratio = f64::INFINITY;
        let mut min_row = None;

        for i in 0..n_rows {
            let val = tableau.data[i][col];
            if val > self.tolerance {
                let ratio = tableau.data[i][rhs_col] / val;
                if ratio >= 0.0 && ratio < min_ratio {
                    min_ratio = ratio;
                    min_row = Some(i);
                }
            }
        }

        min_row
    }

    fn pivot(&self, tableau: &mut Tableau, row: usize, col: usize) {
        let n_rows = tableau.data.len();
        let n_cols = tableau.data[0].len();

        tableau.basic_vars[row] = col;

        let pivot_val = tableau.data[row][col];
        for j in 0..n_cols {
            tableau.data[row][j] /= pivot_val;
        }

        for i in 0..n_rows {
            if i != row {
                let factor = tableau.data[i][col];
                if factor != 0.0 {
                    for j in 0..n_cols {
                        tableau.data[i][j] -= factor * tableau.data[row][j];
                    }
                }
            }
        }
    }

    /// Read variable values out of the basis, clamped to their declared bounds
    fn extract(&self, tableau: &Tableau, problem: &LpProblem) -> (Vec<f64>, f64) {
        let n_vars = problem.num_variables();
        let n_rows = tableau.data.len() - 1;
        let rhs_col = tableau.data[0].len() - 1;

        let mut values = vec![0.0; n_vars];
        for i in 0..n_rows {
            let basic = tableau.basic_vars[i];
            if basic < n_vars {
                values[basic] = tableau.data[i][rhs_col];
            }
        }

        for (j, value) in values.iter_mut().enumerate() {
            let (lower, upper) = problem.bounds[j];
            *value = value.clamp(lower, upper);
        }

        let objective_value = dot(&problem.objective.coefficients, &values);
        (values, objective_value)
    }
}

fn dot(coefficients: &[f64], values: &[f64]) -> f64 {
    coefficients
        .iter()
        .zip(values.iter())
        .map(|(c, v)| c * v)
        .sum()
}

/// One normalized constraint row (declared constraints and bound rows alike)
struct Row {
    coefficients: Vec<f64>,
    op: ConstraintOp,
    rhs: f64,
}

struct Tableau {
    data: Vec<Vec<f64>>,
    basic_vars: Vec<usize>,
    n_vars: usize,
    n_slack: usize,
    n_artificial: usize,
    has_artificial: bool,
}

#[derive(PartialEq, Eq)]
enum PhaseOutcome {
    Done,
    Infeasible,
    IterationLimit,
}
