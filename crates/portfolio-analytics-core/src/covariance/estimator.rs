use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AnalyticsError;
use crate::returns::statistics::mean;
use crate::types::{Rate, ReturnSeries, Ticker};
use crate::AnalyticsResult;

/// Largest |Σij - Σji| accepted from caller-supplied matrices before they
/// are symmetrized.
pub const SYMMETRY_TOLERANCE: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct CovarianceModelData {
    tickers: Vec<Ticker>,
    mean_returns: Vec<Rate>,
    covariance: Vec<Vec<f64>>,
    #[serde(default)]
    periods_per_year: Option<u32>,
    #[serde(default)]
    observations: Option<usize>,
}

/// Annualized mean returns and covariance over an ordered set of tickers.
/// Row/column `i` of the matrix and entry `i` of the mean vector both refer
/// to `tickers[i]`; the matrix is always symmetric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CovarianceModelData")]
pub struct CovarianceModel {
    tickers: Vec<Ticker>,
    mean_returns: Vec<Rate>,
    covariance: Vec<Vec<f64>>,
    /// Set when estimated from return series.
    periods_per_year: Option<u32>,
    observations: Option<usize>,
}

impl CovarianceModel {
    /// Build a model from already-annualized figures, e.g. for scenario
    /// analysis. Small asymmetries are averaged away; larger ones are
    /// rejected.
    pub fn from_parts(
        tickers: Vec<Ticker>,
        mean_returns: Vec<Rate>,
        covariance: Vec<Vec<f64>>,
    ) -> AnalyticsResult<Self> {
        let n = tickers.len();
        if n == 0 {
            return Err(AnalyticsError::insufficient_data("covariance model", 1, 0));
        }
        check_unique(&tickers)?;
        if mean_returns.len() != n {
            return Err(AnalyticsError::invalid_input(
                "mean_returns",
                format!("Expected {} returns but got {}", n, mean_returns.len()),
            ));
        }
        if mean_returns.iter().any(|m| !m.is_finite()) {
            return Err(AnalyticsError::invalid_input(
                "mean_returns",
                "Mean returns must be finite",
            ));
        }
        validate_covariance_matrix(&covariance, n)?;
        Ok(Self {
            tickers,
            mean_returns,
            covariance: symmetrize(&covariance),
            periods_per_year: None,
            observations: None,
        })
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn mean_returns(&self) -> &[Rate] {
        &self.mean_returns
    }

    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn periods_per_year(&self) -> Option<u32> {
        self.periods_per_year
    }

    pub fn observations(&self) -> Option<usize> {
        self.observations
    }

    /// Annualized volatility of each asset (sqrt of the diagonal).
    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.n_assets())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    /// Correlation matrix; pairs involving a zero-variance asset are 0
    /// (1 on the diagonal).
    pub fn correlation_matrix(&self) -> Vec<Vec<f64>> {
        let vols = self.volatilities();
        let n = self.n_assets();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                corr[i][j] = if i == j {
                    1.0
                } else if vols[i] > 0.0 && vols[j] > 0.0 {
                    self.covariance[i][j] / (vols[i] * vols[j])
                } else {
                    0.0
                };
            }
        }
        corr
    }

    pub fn portfolio_return(&self, weights: &[f64]) -> Rate {
        weights
            .iter()
            .zip(self.mean_returns.iter())
            .map(|(w, m)| w * m)
            .sum()
    }

    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        self.covariance
            .iter()
            .zip(weights.iter())
            .map(|(row, wi)| wi * row.iter().zip(weights.iter()).map(|(c, wj)| c * wj).sum::<f64>())
            .sum()
    }

    /// sqrt(w' Σ w), with tiny negative rounding clamped to zero.
    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        self.portfolio_variance(weights).max(0.0).sqrt()
    }
}

impl TryFrom<CovarianceModelData> for CovarianceModel {
    type Error = AnalyticsError;

    fn try_from(data: CovarianceModelData) -> Result<Self, Self::Error> {
        let mut model = CovarianceModel::from_parts(data.tickers, data.mean_returns, data.covariance)?;
        model.periods_per_year = data.periods_per_year;
        model.observations = data.observations;
        Ok(model)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Estimate the annualized mean vector and sample covariance matrix of a set
/// of aligned return series.
///
/// Series must have identical dates; misaligned input is an error, never
/// truncated. The output ticker order is the input order.
pub fn build_model(series: &[ReturnSeries], periods_per_year: u32) -> AnalyticsResult<CovarianceModel> {
    validate_series(series, periods_per_year)?;

    let n = series.len();
    let t = series[0].len();
    let ppy = periods_per_year as f64;

    let means: Vec<f64> = series.iter().map(|s| mean(s.values())).collect();
    let centered: Vec<Vec<f64>> = series
        .iter()
        .zip(means.iter())
        .map(|(s, m)| s.values().iter().map(|v| v - m).collect())
        .collect();

    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = centered[i]
                .iter()
                .zip(centered[j].iter())
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / (t - 1) as f64
                * ppy;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    tracing::debug!(assets = n, observations = t, periods_per_year, "built covariance model");

    Ok(CovarianceModel {
        tickers: series.iter().map(|s| s.ticker().to_string()).collect(),
        mean_returns: means.iter().map(|m| m * ppy).collect(),
        covariance: symmetrize(&cov),
        periods_per_year: Some(periods_per_year),
        observations: Some(t),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_series(series: &[ReturnSeries], periods_per_year: u32) -> AnalyticsResult<()> {
    let Some(first) = series.first() else {
        return Err(AnalyticsError::insufficient_data("covariance model", 1, 0));
    };
    if periods_per_year < 1 {
        return Err(AnalyticsError::invalid_input(
            "periods_per_year",
            "Periods per year must be at least 1",
        ));
    }

    let tickers: Vec<Ticker> = series.iter().map(|s| s.ticker().to_string()).collect();
    check_unique(&tickers)?;

    for s in &series[1..] {
        if s.method() != first.method() {
            return Err(AnalyticsError::invalid_input(
                s.ticker(),
                format!(
                    "Return method {:?} differs from {:?} used by {}",
                    s.method(),
                    first.method(),
                    first.ticker()
                ),
            ));
        }
        if s.len() != first.len() {
            return Err(AnalyticsError::misaligned(
                s.ticker(),
                format!(
                    "{} observations but {} has {}",
                    s.len(),
                    first.ticker(),
                    first.len()
                ),
            ));
        }
        if let Some(i) = s
            .dates()
            .iter()
            .zip(first.dates().iter())
            .position(|(a, b)| a != b)
        {
            return Err(AnalyticsError::misaligned(
                s.ticker(),
                format!(
                    "date {} at position {} does not match {} of {}",
                    s.dates()[i],
                    i,
                    first.dates()[i],
                    first.ticker()
                ),
            ));
        }
    }

    if first.len() < 2 {
        return Err(AnalyticsError::insufficient_data(
            "covariance estimation",
            2,
            first.len(),
        ));
    }
    Ok(())
}

fn check_unique(tickers: &[Ticker]) -> AnalyticsResult<()> {
    let mut seen = HashSet::new();
    for t in tickers {
        if !seen.insert(t.as_str()) {
            return Err(AnalyticsError::invalid_input(
                "tickers",
                format!("Duplicate ticker {t}"),
            ));
        }
    }
    Ok(())
}

#[allow(clippy::needless_range_loop)]
fn validate_covariance_matrix(cov: &[Vec<f64>], n: usize) -> AnalyticsResult<()> {
    if cov.len() != n {
        return Err(AnalyticsError::invalid_input(
            "covariance",
            format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        ));
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(AnalyticsError::invalid_input(
                "covariance",
                format!("Row {} has {} columns, expected {}", i, row.len(), n),
            ));
        }
        if row.iter().any(|c| !c.is_finite()) {
            return Err(AnalyticsError::invalid_input(
                "covariance",
                format!("Row {i} contains a non-finite entry"),
            ));
        }
    }
    for i in 0..n {
        if cov[i][i] < 0.0 {
            return Err(AnalyticsError::invalid_input(
                "covariance",
                format!("Negative variance {} for asset {}", cov[i][i], i),
            ));
        }
        for j in (i + 1)..n {
            if (cov[i][j] - cov[j][i]).abs() > SYMMETRY_TOLERANCE {
                return Err(AnalyticsError::invalid_input(
                    "covariance",
                    format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// (Σ + Σ') / 2
fn symmetrize(cov: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = cov.len();
    (0..n)
        .map(|i| (0..n).map(|j| 0.5 * (cov[i][j] + cov[j][i])).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
