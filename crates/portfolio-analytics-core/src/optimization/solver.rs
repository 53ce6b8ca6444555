use serde::{Deserialize, Serialize};

use super::linalg::{independent_rows, mat_inverse, mat_vec_multiply, norm_inf, solve_linear_system, vec_dot};
use crate::error::AnalyticsError;
use crate::AnalyticsResult;

/// Relative pivot threshold below which H is treated as singular.
const SINGULAR_TOLERANCE: f64 = 1e-12;
/// Relative threshold for dropping dependent equality rows.
const RANK_TOLERANCE: f64 = 1e-10;
/// Allowed equality/bound residual of a starting point.
const FEASIBILITY_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Problem definition
// ---------------------------------------------------------------------------

/// Dense convex quadratic program
///
/// ```text
/// minimize    ½ x'Hx + c'x
/// subject to  A x = b
///             lower <= x <= upper
/// ```
///
/// Infinite bounds mark unbounded coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QpProblem {
    pub hessian: Vec<Vec<f64>>,
    pub linear: Vec<f64>,
    pub eq_matrix: Vec<Vec<f64>>,
    pub eq_rhs: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// A point satisfying every constraint, if the caller knows one.
    #[serde(default)]
    pub initial: Option<Vec<f64>>,
}

impl QpProblem {
    pub fn n(&self) -> usize {
        self.linear.len()
    }

    /// True when no coordinate has a finite bound.
    pub fn is_unbounded(&self) -> bool {
        self.lower.iter().all(|l| *l == f64::NEG_INFINITY) && self.upper.iter().all(|u| *u == f64::INFINITY)
    }

    pub fn objective(&self, x: &[f64]) -> f64 {
        0.5 * vec_dot(x, &mat_vec_multiply(&self.hessian, x)) + vec_dot(&self.linear, x)
    }

    fn validate(&self) -> AnalyticsResult<()> {
        let n = self.n();
        if n == 0 {
            return Err(AnalyticsError::invalid_input("qp", "Problem has no variables"));
        }
        if self.hessian.len() != n || self.hessian.iter().any(|r| r.len() != n) {
            return Err(AnalyticsError::invalid_input("qp.hessian", format!("Expected {n}x{n} matrix")));
        }
        if self.eq_matrix.len() != self.eq_rhs.len() || self.eq_matrix.iter().any(|r| r.len() != n) {
            return Err(AnalyticsError::invalid_input(
                "qp.eq_matrix",
                format!("Expected {} rows of length {}", self.eq_rhs.len(), n),
            ));
        }
        if self.lower.len() != n || self.upper.len() != n {
            return Err(AnalyticsError::invalid_input("qp.bounds", format!("Expected {n} lower and upper bounds")));
        }
        if let Some(i) = (0..n).find(|&i| self.lower[i] > self.upper[i]) {
            return Err(AnalyticsError::InfeasibleConstraints(format!(
                "lower bound {} exceeds upper bound {} for variable {}",
                self.lower[i], self.upper[i], i
            )));
        }
        Ok(())
    }

    /// Indices of independent equality rows. Dependent rows must be
    /// consistent with the kept ones, which is checked on the solution.
    fn independent_equalities(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        let keep = independent_rows(&self.eq_matrix, RANK_TOLERANCE);
        (
            keep.iter().map(|&k| self.eq_matrix[k].clone()).collect(),
            keep.iter().map(|&k| self.eq_rhs[k]).collect(),
        )
    }

    fn equality_residual(&self, x: &[f64]) -> f64 {
        self.eq_matrix
            .iter()
            .zip(self.eq_rhs.iter())
            .map(|(row, b)| (vec_dot(row, x) - b).abs())
            .fold(0.0, f64::max)
    }

    fn bound_violation(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(xi, (l, u))| (l - xi).max(xi - u).max(0.0))
            .fold(0.0, f64::max)
    }
}

/// A backend able to solve [`QpProblem`]s. The optimizer only talks to this
/// trait, so backends can be swapped without touching frontier logic.
pub trait QpSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Optimal `x`. Fails with `InfeasibleConstraints` when the constraints
    /// admit no point and `SingularCovariance` when the backend needs an
    /// invertible Hessian it does not have.
    fn solve(&self, problem: &QpProblem) -> AnalyticsResult<Vec<f64>>;
}

// ---------------------------------------------------------------------------
// Closed form
// ---------------------------------------------------------------------------

/// Equality-constrained closed form `x = H⁻¹(A'ν - c)` with
/// `(A H⁻¹ A') ν = b + A H⁻¹ c`. Cannot enforce bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormSolver;

impl QpSolver for ClosedFormSolver {
    fn name(&self) -> &'static str {
        "closed_form"
    }

    fn solve(&self, problem: &QpProblem) -> AnalyticsResult<Vec<f64>> {
        problem.validate()?;
        if !problem.is_unbounded() {
            return Err(AnalyticsError::invalid_input(
                "qp.bounds",
                "Closed-form solver cannot enforce weight bounds",
            ));
        }

        let h_inv = mat_inverse(&problem.hessian, SINGULAR_TOLERANCE).ok_or_else(|| {
            AnalyticsError::SingularCovariance(
                "covariance matrix is not invertible; supply weight bounds to use the bounded solver".into(),
            )
        })?;

        let (a, b) = problem.independent_equalities();
        let h_inv_c = mat_vec_multiply(&h_inv, &problem.linear);
        let h_inv_at: Vec<Vec<f64>> = a.iter().map(|row| mat_vec_multiply(&h_inv, row)).collect();

        let m = a.len();
        let mut schur = vec![vec![0.0; m]; m];
        for i in 0..m {
            for j in 0..m {
                schur[i][j] = vec_dot(&a[i], &h_inv_at[j]);
            }
        }
        let rhs: Vec<f64> = (0..m).map(|i| b[i] + vec_dot(&a[i], &h_inv_c)).collect();
        let nu = solve_linear_system(schur, rhs, SINGULAR_TOLERANCE).ok_or_else(|| {
            AnalyticsError::SingularCovariance("equality constraints are degenerate under the covariance metric".into())
        })?;

        let n = problem.n();
        let x: Vec<f64> = (0..n)
            .map(|i| (0..m).map(|k| nu[k] * h_inv_at[k][i]).sum::<f64>() - h_inv_c[i])
            .collect();

        let residual = problem.equality_residual(&x);
        if residual > FEASIBILITY_TOLERANCE * (1.0 + norm_inf(&problem.eq_rhs)) {
            return Err(AnalyticsError::InfeasibleConstraints(format!(
                "equality constraints are inconsistent (residual {residual:e})"
            )));
        }
        Ok(x)
    }
}

// ---------------------------------------------------------------------------
// Primal active set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundState {
    Free,
    AtLower,
    AtUpper,
}

/// Primal active-set method for bound-constrained QPs with equality rows.
///
/// Starts from a feasible point with an empty working set and only adds the
/// blocking bound of each step, so the working set stays linearly
/// independent of the equality rows and multipliers are unique. A small
/// ridge on H keeps each KKT system non-singular when Σ is only
/// semi-definite.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSetSolver {
    /// Ridge added to the Hessian diagonal, relative to its largest entry.
    pub ridge: f64,
    /// Step size (relative to 1 + |x|) treated as zero.
    pub step_tolerance: f64,
    /// Multiplier magnitude (relative to 1 + |g|) treated as zero.
    pub multiplier_tolerance: f64,
    /// Predicted objective decrease (relative to 1 + |f|) treated as zero.
    pub decrease_tolerance: f64,
    pub max_iterations: Option<u32>,
}

impl Default for ActiveSetSolver {
    fn default() -> Self {
        Self {
            ridge: 1e-12,
            step_tolerance: 1e-10,
            multiplier_tolerance: 1e-10,
            decrease_tolerance: 1e-20,
            max_iterations: None,
        }
    }
}

impl ActiveSetSolver {
    fn starting_point(&self, problem: &QpProblem, a: &[Vec<f64>], b: &[f64]) -> AnalyticsResult<Vec<f64>> {
        let x = match problem.initial {
            Some(ref x0) => {
                if x0.len() != problem.n() {
                    return Err(AnalyticsError::invalid_input(
                        "qp.initial",
                        format!("Expected {} values but got {}", problem.n(), x0.len()),
                    ));
                }
                x0.clone()
            }
            None => least_norm_solution(a, b, problem.n())?,
        };

        let scale = 1.0 + norm_inf(&x);
        if problem.equality_residual(&x) > FEASIBILITY_TOLERANCE * scale
            || problem.bound_violation(&x) > FEASIBILITY_TOLERANCE * scale
        {
            return Err(AnalyticsError::invalid_input(
                "qp.initial",
                "Active-set solver requires a feasible starting point",
            ));
        }

        Ok(x.iter()
            .zip(problem.lower.iter().zip(problem.upper.iter()))
            .map(|(xi, (l, u))| xi.clamp(*l, *u))
            .collect())
    }

    /// Solve the equality-constrained step on the free coordinates:
    /// `[H_FF + δI, A_F'; A_F, 0] [p; λ] = [-g_F; 0]`.
    fn kkt_step(
        &self,
        problem: &QpProblem,
        a: &[Vec<f64>],
        free: &[usize],
        g: &[f64],
        ridge: f64,
    ) -> Option<(Vec<f64>, Vec<f64>)> {
        let nf = free.len();
        let m = a.len();
        let size = nf + m;
        let mut kkt = vec![vec![0.0; size]; size];
        let mut rhs = vec![0.0; size];

        for (r, &i) in free.iter().enumerate() {
            for (c, &j) in free.iter().enumerate() {
                kkt[r][c] = problem.hessian[i][j];
            }
            kkt[r][r] += ridge;
            for (k, row) in a.iter().enumerate() {
                kkt[r][nf + k] = row[i];
                kkt[nf + k][r] = row[i];
            }
            rhs[r] = -g[i];
        }

        let sol = solve_linear_system(kkt, rhs, 1e-15)?;
        Some((sol[..nf].to_vec(), sol[nf..].to_vec()))
    }
}

impl QpSolver for ActiveSetSolver {
    fn name(&self) -> &'static str {
        "active_set"
    }

    fn solve(&self, problem: &QpProblem) -> AnalyticsResult<Vec<f64>> {
        problem.validate()?;
        let n = problem.n();
        let (a, b) = problem.independent_equalities();
        if a.len() > n {
            return Err(AnalyticsError::InfeasibleConstraints(
                "more independent equality constraints than variables".into(),
            ));
        }

        let mut x = self.starting_point(problem, &a, &b)?;
        let mut state = vec![BoundState::Free; n];

        let max_diag = (0..n).map(|i| problem.hessian[i][i].abs()).fold(0.0, f64::max);
        let ridge = self.ridge * if max_diag > 0.0 { max_diag } else { 1.0 };
        let max_iterations = self.max_iterations.unwrap_or(50 * (n + a.len()) as u32 + 100);

        let mut last_step = f64::NAN;
        for _ in 0..max_iterations {
            let hx = mat_vec_multiply(&problem.hessian, &x);
            let g: Vec<f64> = hx.iter().zip(problem.linear.iter()).map(|(h, c)| h + c).collect();
            let free: Vec<usize> = (0..n).filter(|&i| state[i] == BoundState::Free).collect();

            let (p, lambda) = self.kkt_step(problem, &a, &free, &g, ridge).ok_or_else(|| {
                AnalyticsError::ConvergenceFailure {
                    function: "active_set_qp: singular KKT system".into(),
                    iterations: 0,
                    last_delta: last_step,
                }
            })?;
            last_step = norm_inf(&p);

            // Steps along zero-curvature directions of a semi-definite H are
            // pure rounding noise; a negligible predicted decrease counts as
            // stationary as well.
            let predicted_decrease = -free
                .iter()
                .enumerate()
                .map(|(r, &i)| {
                    let hp: f64 = free.iter().enumerate().map(|(c, &j)| problem.hessian[i][j] * p[c]).sum();
                    p[r] * (g[i] + 0.5 * hp)
                })
                .sum::<f64>();
            let stationary = last_step <= self.step_tolerance * (1.0 + norm_inf(&x))
                || predicted_decrease <= self.decrease_tolerance * (1.0 + problem.objective(&x).abs());

            if stationary {
                // Stationary on the working set: check the bound multipliers.
                let tol = self.multiplier_tolerance * (1.0 + norm_inf(&g));
                let mut worst: Option<(usize, f64)> = None;
                for i in (0..n).filter(|&i| state[i] != BoundState::Free) {
                    let r = g[i] + a.iter().zip(lambda.iter()).map(|(row, l)| row[i] * l).sum::<f64>();
                    let violation = match state[i] {
                        BoundState::AtLower => -r,
                        BoundState::AtUpper => r,
                        BoundState::Free => 0.0,
                    };
                    if violation > tol && worst.map_or(true, |(_, v)| violation > v) {
                        worst = Some((i, violation));
                    }
                }
                match worst {
                    None => {
                        let residual = problem.equality_residual(&x);
                        if residual > FEASIBILITY_TOLERANCE * (1.0 + norm_inf(&problem.eq_rhs)) {
                            return Err(AnalyticsError::InfeasibleConstraints(format!(
                                "equality constraints are inconsistent (residual {residual:e})"
                            )));
                        }
                        return Ok(x);
                    }
                    Some((i, _)) => state[i] = BoundState::Free,
                }
                continue;
            }

            // Ratio test: longest step along p that keeps x within bounds.
            let mut alpha = 1.0;
            let mut blocking: Option<(usize, BoundState)> = None;
            for (k, &i) in free.iter().enumerate() {
                let (limit, side) = if p[k] < 0.0 && problem.lower[i].is_finite() {
                    ((problem.lower[i] - x[i]) / p[k], BoundState::AtLower)
                } else if p[k] > 0.0 && problem.upper[i].is_finite() {
                    ((problem.upper[i] - x[i]) / p[k], BoundState::AtUpper)
                } else {
                    continue;
                };
                let limit = limit.max(0.0);
                if limit < alpha {
                    alpha = limit;
                    blocking = Some((i, side));
                }
            }

            if blocking.is_none() && last_step > 1e8 * (1.0 + norm_inf(&x)) {
                return Err(AnalyticsError::SingularCovariance(
                    "objective is unbounded along a zero-variance direction".into(),
                ));
            }

            for (k, &i) in free.iter().enumerate() {
                x[i] += alpha * p[k];
            }
            if let Some((i, side)) = blocking {
                x[i] = match side {
                    BoundState::AtLower => problem.lower[i],
                    _ => problem.upper[i],
                };
                state[i] = side;
            }
            for i in 0..n {
                x[i] = x[i].clamp(problem.lower[i], problem.upper[i]);
            }
        }

        Err(AnalyticsError::ConvergenceFailure {
            function: "active_set_qp".into(),
            iterations: max_iterations,
            last_delta: last_step,
        })
    }
}

/// Minimum-norm solution of `A x = b` (A with independent rows).
fn least_norm_solution(a: &[Vec<f64>], b: &[f64], n: usize) -> AnalyticsResult<Vec<f64>> {
    let m = a.len();
    let mut gram = vec![vec![0.0; m]; m];
    for i in 0..m {
        for j in 0..m {
            gram[i][j] = vec_dot(&a[i], &a[j]);
        }
    }
    let y = solve_linear_system(gram, b.to_vec(), 1e-14).ok_or_else(|| {
        AnalyticsError::InfeasibleConstraints("equality constraints are degenerate".into())
    })?;
    Ok((0..n).map(|i| (0..m).map(|k| a[k][i] * y[k]).sum()).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
