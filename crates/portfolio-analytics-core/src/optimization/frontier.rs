use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::constraints::{clean_weights, resolve_bounds, ResolvedBounds, ReturnEnvelope};
use super::solver::{ActiveSetSolver, ClosedFormSolver, QpProblem, QpSolver};
use crate::cancel::CancellationToken;
use crate::config::PortfolioConstraints;
use crate::covariance::CovarianceModel;
use crate::error::AnalyticsError;
use crate::types::{with_metadata, ComputationOutput, Portfolio, Rate, SharpeRatio};
use crate::AnalyticsResult;

/// Iteration cap for the Sharpe line search along the efficient branch.
const GOLDEN_SECTION_ITERATIONS: u32 = 80;

/// Returns within this distance of the minimum-variance return still count
/// as efficient.
const EFFICIENT_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A portfolio with its risk/return figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    pub portfolio: Portfolio,
    pub expected_return: Rate,
    pub volatility: f64,
    pub sharpe_ratio: SharpeRatio,
}

/// Minimum-variance portfolio for one target return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: Rate,
    /// Realized w'μ, equal to the target up to solver tolerance.
    pub expected_return: Rate,
    pub volatility: f64,
    pub sharpe_ratio: SharpeRatio,
    pub portfolio: Portfolio,
    /// On the upper (efficient) branch, i.e. at or above the minimum-variance
    /// return.
    pub is_efficient: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficientFrontier {
    /// Ordered by strictly increasing target return.
    pub points: Vec<FrontierPoint>,
    pub min_risk: PortfolioPerformance,
    pub max_sharpe: PortfolioPerformance,
    pub risk_free_rate: Rate,
    /// Span of target returns (low, high).
    pub return_range: (Rate, Rate),
    pub solver: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Trace the efficient frontier of `model` under `constraints`.
///
/// Bounded problems (long-only, or explicit weight bounds) go through the
/// active-set solver; unbounded short-selling problems use the closed form,
/// which requires an invertible covariance matrix.
pub fn compute_frontier(
    model: &CovarianceModel,
    constraints: &PortfolioConstraints,
    risk_free_rate: Rate,
    cancel: &CancellationToken,
) -> AnalyticsResult<ComputationOutput<EfficientFrontier>> {
    let bounds = resolve_bounds(constraints, model.n_assets())?;
    if bounds.is_some() {
        compute_frontier_with_solver(model, constraints, risk_free_rate, &ActiveSetSolver::default(), cancel)
    } else {
        compute_frontier_with_solver(model, constraints, risk_free_rate, &ClosedFormSolver, cancel)
    }
}

/// [`compute_frontier`] with a caller-chosen QP backend.
pub fn compute_frontier_with_solver(
    model: &CovarianceModel,
    constraints: &PortfolioConstraints,
    risk_free_rate: Rate,
    solver: &dyn QpSolver,
    cancel: &CancellationToken,
) -> AnalyticsResult<ComputationOutput<EfficientFrontier>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if !risk_free_rate.is_finite() {
        return Err(AnalyticsError::invalid_input("risk_free_rate", "Risk-free rate must be finite"));
    }
    let bounds = resolve_bounds(constraints, model.n_assets())?;
    let ctx = FrontierContext::new(model, bounds, solver, risk_free_rate);

    let _span = tracing::debug_span!(
        "compute_frontier",
        n_assets = model.n_assets(),
        solver = solver.name(),
        bounded = ctx.bounds.is_some()
    )
    .entered();

    // --- Minimum-risk portfolio ---
    cancel.check()?;
    let min_risk_w = ctx.solve_min_risk()?;
    let min_risk = ctx.performance(min_risk_w);
    let r_mv = min_risk.expected_return;

    // --- Target span ---
    let mu = model.mean_returns();
    let (lo, hi) = match ctx.envelope {
        Some(ref env) => (env.low.0, env.high.0),
        None => {
            let min_mu = mu.iter().copied().fold(f64::INFINITY, f64::min);
            let max_mu = mu.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min_mu.min(r_mv), max_mu.max(r_mv))
        }
    };
    let targets = linspace(lo, hi, constraints.num_points);
    tracing::debug!(low = lo, high = hi, targets = targets.len(), "frontier target span");

    // --- Frontier points (independent QPs) ---
    let solved: Vec<Option<FrontierPoint>> = targets
        .par_iter()
        .map(|&target| -> AnalyticsResult<Option<FrontierPoint>> {
            cancel.check()?;
            let Some(w) = ctx.solve_target(target)? else {
                return Ok(None);
            };
            let perf = ctx.performance(w);
            Ok(Some(FrontierPoint {
                target_return: target,
                expected_return: perf.expected_return,
                volatility: perf.volatility,
                sharpe_ratio: perf.sharpe_ratio,
                is_efficient: perf.expected_return >= r_mv - EFFICIENT_TOLERANCE,
                portfolio: perf.portfolio,
            }))
        })
        .collect::<AnalyticsResult<Vec<_>>>()?;

    let mut points = Vec::with_capacity(solved.len());
    for (target, point) in targets.iter().zip(solved) {
        match point {
            Some(p) => points.push(p),
            None => {
                tracing::warn!(target_return = target, "frontier target infeasible, omitted");
                warnings.push(format!("Target return {target:.6} is infeasible under the constraints and was omitted"));
            }
        }
    }
    points.sort_by(|a, b| a.target_return.total_cmp(&b.target_return));

    // --- Maximum-Sharpe portfolio ---
    let max_sharpe = ctx.solve_max_sharpe(&min_risk, &points, hi, cancel, &mut warnings)?;
    if !max_sharpe.sharpe_ratio.is_defined() {
        warnings.push("Every candidate portfolio has zero volatility; Sharpe ratio undefined".into());
    }

    let output = EfficientFrontier {
        points,
        min_risk,
        max_sharpe,
        risk_free_rate,
        return_range: (lo, hi),
        solver: solver.name().to_string(),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Markowitz Mean-Variance Efficient Frontier",
        &serde_json::json!({
            "n_assets": model.n_assets(),
            "risk_free_rate": risk_free_rate,
            "allow_short": constraints.allow_short,
            "bounded": ctx.bounds.is_some(),
            "num_points": constraints.num_points,
            "solver": solver.name(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Expected return, volatility and Sharpe ratio of an arbitrary weight
/// vector over `model`'s tickers.
pub fn portfolio_performance(
    model: &CovarianceModel,
    weights: &[f64],
    risk_free_rate: Rate,
) -> AnalyticsResult<PortfolioPerformance> {
    if weights.len() != model.n_assets() {
        return Err(AnalyticsError::invalid_input(
            "weights",
            format!("Expected {} weights but got {}", model.n_assets(), weights.len()),
        ));
    }
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(AnalyticsError::invalid_input("weights", "Weights must be finite"));
    }
    Ok(evaluate(model, weights.to_vec(), risk_free_rate))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct FrontierContext<'a> {
    model: &'a CovarianceModel,
    bounds: Option<ResolvedBounds>,
    envelope: Option<ReturnEnvelope>,
    solver: &'a dyn QpSolver,
    risk_free_rate: Rate,
}

impl<'a> FrontierContext<'a> {
    fn new(
        model: &'a CovarianceModel,
        bounds: Option<ResolvedBounds>,
        solver: &'a dyn QpSolver,
        risk_free_rate: Rate,
    ) -> Self {
        let envelope = bounds.as_ref().map(|b| ReturnEnvelope::new(b, model.mean_returns()));
        Self {
            model,
            bounds,
            envelope,
            solver,
            risk_free_rate,
        }
    }

    /// QP skeleton: minimize w'Σw (H = 2Σ) subject to Σw = 1 and the box.
    fn base_problem(&self) -> QpProblem {
        let n = self.model.n_assets();
        let hessian = self
            .model
            .covariance()
            .iter()
            .map(|row| row.iter().map(|c| 2.0 * c).collect())
            .collect();
        let (lower, upper) = match self.bounds {
            Some(ref b) => (b.lower.clone(), b.upper.clone()),
            None => (vec![f64::NEG_INFINITY; n], vec![f64::INFINITY; n]),
        };
        QpProblem {
            hessian,
            linear: vec![0.0; n],
            eq_matrix: vec![vec![1.0; n]],
            eq_rhs: vec![1.0],
            lower,
            upper,
            initial: None,
        }
    }

    fn solve_min_risk(&self) -> AnalyticsResult<Vec<f64>> {
        let mut problem = self.base_problem();
        problem.initial = self.envelope.as_ref().map(|env| env.low.1.clone());
        Ok(clean_weights(&self.solver.solve(&problem)?, self.bounds.as_ref()))
    }

    /// Minimum-variance weights earning `target`, or `None` when no
    /// portfolio within the constraints does.
    fn solve_target(&self, target: Rate) -> AnalyticsResult<Option<Vec<f64>>> {
        let mut problem = self.base_problem();
        problem.eq_matrix.push(self.model.mean_returns().to_vec());
        problem.eq_rhs.push(target);
        if let Some(ref env) = self.envelope {
            match env.feasible_point(target) {
                Some(w0) => problem.initial = Some(w0),
                None => return Ok(None),
            }
        }
        match self.solver.solve(&problem) {
            Ok(w) => Ok(Some(clean_weights(&w, self.bounds.as_ref()))),
            Err(AnalyticsError::InfeasibleConstraints(reason)) => {
                tracing::debug!(target_return = target, %reason, "target QP infeasible");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn performance(&self, weights: Vec<f64>) -> PortfolioPerformance {
        evaluate(self.model, weights, self.risk_free_rate)
    }

    /// Unconstrained tangency portfolio Σ⁻¹(μ - rf) / 1'Σ⁻¹(μ - rf), found as
    /// min y'Σy s.t. (μ - rf)'y = 1 and rescaled to a unit budget. `None`
    /// when the denominator is not positive or the problem is degenerate.
    fn tangency(&self) -> AnalyticsResult<Option<Vec<f64>>> {
        let n = self.model.n_assets();
        let mut problem = self.base_problem();
        problem.eq_matrix = vec![self.model.mean_returns().iter().map(|m| m - self.risk_free_rate).collect()];
        problem.lower = vec![f64::NEG_INFINITY; n];
        problem.upper = vec![f64::INFINITY; n];

        let y = match ClosedFormSolver.solve(&problem) {
            Ok(y) => y,
            Err(AnalyticsError::InfeasibleConstraints(_)) | Err(AnalyticsError::SingularCovariance(_)) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let denom: f64 = y.iter().sum();
        if denom <= 1e-12 * (1.0 + y.iter().map(|v| v.abs()).sum::<f64>()) {
            return Ok(None);
        }
        Ok(Some(y.iter().map(|v| v / denom).collect()))
    }

    fn solve_max_sharpe(
        &self,
        min_risk: &PortfolioPerformance,
        points: &[FrontierPoint],
        upper_return: Rate,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> AnalyticsResult<PortfolioPerformance> {
        cancel.check()?;
        if let Some(w) = self.tangency()? {
            let feasible = self.bounds.as_ref().map_or(true, |b| b.is_feasible(&w));
            if feasible {
                tracing::debug!("max-Sharpe portfolio from closed-form tangency");
                return Ok(self.performance(clean_weights(&w, self.bounds.as_ref())));
            }
        }

        // Search the efficient branch, then compare against every point
        // already on hand.
        let mut best = min_risk.clone();
        let consider = |candidate: PortfolioPerformance, best: &mut PortfolioPerformance| {
            if candidate.sharpe_ratio.rank_key() > best.sharpe_ratio.rank_key() {
                *best = candidate;
            }
        };
        for p in points {
            consider(
                PortfolioPerformance {
                    portfolio: p.portfolio.clone(),
                    expected_return: p.expected_return,
                    volatility: p.volatility,
                    sharpe_ratio: p.sharpe_ratio,
                },
                &mut best,
            );
        }
        // An empty branch (min-risk already earns the top return) leaves
        // nothing to search.
        let low = min_risk.expected_return;
        if upper_return - low <= 1e-12 * (1.0 + upper_return.abs().max(low.abs())) {
            return Ok(best);
        }
        match self.golden_section(low, upper_return, cancel)? {
            Some(found) => consider(found, &mut best),
            None => {
                tracing::warn!(low, high = upper_return, "Sharpe line search found no feasible portfolio");
                warnings.push("Sharpe line search found no feasible portfolio; using best frontier point".into());
            }
        }
        Ok(best)
    }

    /// Maximize the Sharpe ratio over target returns in [low, high]. Sharpe
    /// is quasi-concave along the efficient branch.
    fn golden_section(
        &self,
        low: Rate,
        high: Rate,
        cancel: &CancellationToken,
    ) -> AnalyticsResult<Option<PortfolioPerformance>> {
        if high <= low {
            return Ok(None);
        }
        let inv_phi = (5f64.sqrt() - 1.0) / 2.0;

        let eval = |target: Rate| -> AnalyticsResult<Option<PortfolioPerformance>> {
            Ok(self.solve_target(target)?.map(|w| self.performance(w)))
        };
        let key = |p: &Option<PortfolioPerformance>| p.as_ref().map_or(f64::NEG_INFINITY, |p| p.sharpe_ratio.rank_key());

        let (mut a, mut b) = (low, high);
        let mut c = b - inv_phi * (b - a);
        let mut d = a + inv_phi * (b - a);
        let mut fc = eval(c)?;
        let mut fd = eval(d)?;

        for _ in 0..GOLDEN_SECTION_ITERATIONS {
            cancel.check()?;
            if (b - a).abs() <= 1e-10 * (1.0 + b.abs()) {
                break;
            }
            if key(&fc) >= key(&fd) {
                b = d;
                d = c;
                fd = fc;
                c = b - inv_phi * (b - a);
                fc = eval(c)?;
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + inv_phi * (b - a);
                fd = eval(d)?;
            }
        }

        Ok(if key(&fc) >= key(&fd) { fc } else { fd })
    }
}

fn evaluate(model: &CovarianceModel, weights: Vec<f64>, risk_free_rate: Rate) -> PortfolioPerformance {
    let expected_return = model.portfolio_return(&weights);
    let volatility = model.portfolio_volatility(&weights);
    PortfolioPerformance {
        portfolio: Portfolio {
            tickers: model.tickers().to_vec(),
            weights,
        },
        expected_return,
        volatility,
        sharpe_ratio: SharpeRatio::compute(expected_return, risk_free_rate, volatility),
    }
}

/// `num` evenly spaced values from `low` to `high`; a single value when the
/// range is degenerate.
fn linspace(low: f64, high: f64, num: usize) -> Vec<f64> {
    if num < 2 || high - low <= 1e-12 * (1.0 + high.abs().max(low.abs())) {
        return vec![low];
    }
    let step = (high - low) / (num - 1) as f64;
    (0..num)
        .map(|i| if i == num - 1 { high } else { low + step * i as f64 })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
