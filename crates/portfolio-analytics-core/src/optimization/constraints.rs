use serde::{Deserialize, Serialize};

use crate::config::{PortfolioConstraints, WeightBounds};
use crate::error::AnalyticsError;
use crate::AnalyticsResult;

/// Slack allowed when checking a candidate against its bounds.
const FEASIBILITY_SLACK: f64 = 1e-9;
/// Budget residual left in place by `clean_weights`.
const SUM_TOLERANCE: f64 = 1e-12;

/// Concrete per-asset box `lower[i] <= w[i] <= upper[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Turn a constraint set into per-asset bounds for `n` assets.
///
/// Returns `None` when weights are unbounded (shorts allowed, no explicit
/// bounds). Long-only clamps every lower bound at zero and defaults the box
/// to [0, 1].
pub fn resolve_bounds(constraints: &PortfolioConstraints, n: usize) -> AnalyticsResult<Option<ResolvedBounds>> {
    constraints.validate()?;

    let (mut lower, upper) = match constraints.weight_bounds {
        None if constraints.allow_short => return Ok(None),
        None => (vec![0.0; n], vec![1.0; n]),
        Some(WeightBounds::Global { min, max }) => (vec![min; n], vec![max; n]),
        Some(WeightBounds::PerAsset { ref min, ref max }) => {
            if min.len() != n {
                return Err(AnalyticsError::invalid_input(
                    "weight_bounds",
                    format!("Expected {} per-asset bounds but got {}", n, min.len()),
                ));
            }
            (min.clone(), max.clone())
        }
    };

    if !constraints.allow_short {
        for l in lower.iter_mut() {
            *l = l.max(0.0);
        }
    }

    let bounds = ResolvedBounds { lower, upper };
    bounds.check_consistent()?;
    Ok(Some(bounds))
}

impl ResolvedBounds {
    pub fn n(&self) -> usize {
        self.lower.len()
    }

    fn check_consistent(&self) -> AnalyticsResult<()> {
        for i in 0..self.n() {
            if self.lower[i] > self.upper[i] {
                return Err(AnalyticsError::InfeasibleConstraints(format!(
                    "asset {}: lower bound {} exceeds upper bound {}",
                    i, self.lower[i], self.upper[i]
                )));
            }
        }
        let sum_lower: f64 = self.lower.iter().sum();
        let sum_upper: f64 = self.upper.iter().sum();
        if sum_lower > 1.0 + FEASIBILITY_SLACK {
            return Err(AnalyticsError::InfeasibleConstraints(format!(
                "lower bounds sum to {sum_lower:.6}, above the full budget of 1"
            )));
        }
        if sum_upper < 1.0 - FEASIBILITY_SLACK {
            return Err(AnalyticsError::InfeasibleConstraints(format!(
                "upper bounds sum to {sum_upper:.6}, below the full budget of 1"
            )));
        }
        Ok(())
    }

    /// Whether `w` is a fully invested portfolio inside the box.
    pub fn is_feasible(&self, w: &[f64]) -> bool {
        let sum: f64 = w.iter().sum();
        w.len() == self.n()
            && (sum - 1.0).abs() <= 1e-6
            && w.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(wi, (l, u))| *wi >= l - FEASIBILITY_SLACK && *wi <= u + FEASIBILITY_SLACK)
    }

    /// Fully invested portfolio with the highest (or lowest) expected return:
    /// start at the lower bounds and spend the remaining budget on assets in
    /// order of `mu`. Ties go to the lower index.
    pub fn extreme_allocation(&self, mu: &[f64], maximize: bool) -> Vec<f64> {
        let mut order: Vec<usize> = (0..self.n()).collect();
        order.sort_by(|&a, &b| {
            let cmp = mu[a].total_cmp(&mu[b]);
            let cmp = if maximize { cmp.reverse() } else { cmp };
            cmp.then(a.cmp(&b))
        });

        let mut w = self.lower.clone();
        let mut remaining = 1.0 - w.iter().sum::<f64>();
        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let add = (self.upper[i] - self.lower[i]).min(remaining);
            w[i] += add;
            remaining -= add;
        }
        w
    }
}

/// Achievable return range under the bounds, with the extreme portfolios.
#[derive(Debug, Clone)]
pub(crate) struct ReturnEnvelope {
    pub low: (f64, Vec<f64>),
    pub high: (f64, Vec<f64>),
}

impl ReturnEnvelope {
    pub fn new(bounds: &ResolvedBounds, mu: &[f64]) -> Self {
        let lo_w = bounds.extreme_allocation(mu, false);
        let hi_w = bounds.extreme_allocation(mu, true);
        let ret = |w: &[f64]| w.iter().zip(mu.iter()).map(|(a, b)| a * b).sum::<f64>();
        Self {
            low: (ret(&lo_w), lo_w),
            high: (ret(&hi_w), hi_w),
        }
    }

    /// Feasible portfolio earning `target`, as a convex combination of the
    /// two extremes. `None` when `target` is outside the envelope.
    pub fn feasible_point(&self, target: f64) -> Option<Vec<f64>> {
        let (r_lo, ref w_lo) = self.low;
        let (r_hi, ref w_hi) = self.high;
        let span = r_hi - r_lo;
        let tol = 1e-12 * (1.0 + r_lo.abs().max(r_hi.abs()));
        if target < r_lo - tol || target > r_hi + tol {
            return None;
        }
        let t = if span <= tol { 0.0 } else { ((target - r_lo) / span).clamp(0.0, 1.0) };
        Some(w_lo.iter().zip(w_hi.iter()).map(|(a, b)| (1.0 - t) * a + t * b).collect())
    }
}

/// Clamp near-zero weights to exactly zero and restore a unit sum.
///
/// Without bounds the weights are simply rescaled. With bounds a weight is
/// only zeroed when zero lies inside its box, and the clamped mass is spread
/// over the remaining non-zero weights in proportion to their room to move,
/// so no weight leaves its box.
pub fn clean_weights(weights: &[f64], bounds: Option<&ResolvedBounds>) -> Vec<f64> {
    let Some(b) = bounds else {
        let mut w: Vec<f64> = weights
            .iter()
            .map(|x| if x.abs() < super::WEIGHT_CLAMP { 0.0 } else { *x })
            .collect();
        let sum: f64 = w.iter().sum();
        if sum.abs() > f64::EPSILON {
            for x in w.iter_mut() {
                *x /= sum;
            }
        }
        return w;
    };

    let mut w: Vec<f64> = weights
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let x = x.clamp(b.lower[i], b.upper[i]);
            if x.abs() < super::WEIGHT_CLAMP && b.lower[i] <= 0.0 && b.upper[i] >= 0.0 {
                0.0
            } else {
                x
            }
        })
        .collect();

    // Non-zero weights absorb the residual first; zeroed ones only if they
    // cannot.
    for allow_zeroed in [false, true] {
        let residual = 1.0 - w.iter().sum::<f64>();
        if residual.abs() <= SUM_TOLERANCE {
            break;
        }
        let room: Vec<f64> = (0..w.len())
            .map(|i| {
                if !allow_zeroed && w[i] == 0.0 {
                    0.0
                } else if residual > 0.0 {
                    b.upper[i] - w[i]
                } else {
                    w[i] - b.lower[i]
                }
            })
            .collect();
        let total: f64 = room.iter().sum();
        if total <= 0.0 {
            continue;
        }
        let share = (residual.abs() / total).min(1.0) * residual.signum();
        for i in 0..w.len() {
            w[i] = (w[i] + share * room[i]).clamp(b.lower[i], b.upper[i]);
        }
    }
    w
}
