use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::AnalyticsError;
use crate::types::{with_metadata, ComputationOutput, Rate, ReturnSeries, SharpeRatio, VOLATILITY_EPSILON};
use crate::AnalyticsResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Normal distribution fitted to periodic returns by maximum likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalFit {
    pub mean: f64,
    /// Population (MLE) standard deviation.
    pub std_dev: f64,
}

/// Jarque-Bera normality test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalityTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Summary statistics for one ticker's return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub ticker: String,
    pub observations: usize,
    /// Mean periodic return.
    pub mean_return: f64,
    /// Median periodic return.
    pub median_return: f64,
    /// Sample variance of periodic returns.
    pub variance: f64,
    /// Mean periodic return x periods per year.
    pub annualized_return: Rate,
    /// Sample std dev x sqrt(periods per year).
    pub annualized_volatility: Rate,
    pub sharpe_ratio: SharpeRatio,
    /// Fisher skewness (biased estimator); absent for zero variance.
    pub skewness: Option<f64>,
    /// Excess kurtosis (normal = 0); absent for zero variance.
    pub kurtosis: Option<f64>,
    pub normal_fit: NormalFit,
    /// Absent for zero variance.
    pub jarque_bera: Option<NormalityTest>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compute annualized return, volatility, Sharpe ratio and higher moments of
/// a return series.
///
/// A zero-volatility series is a valid input: the Sharpe ratio is reported as
/// `SharpeRatio::Undefined`, moments as `None`, and a warning is attached.
pub fn compute_statistics(
    returns: &ReturnSeries,
    risk_free_rate: Rate,
    periods_per_year: u32,
) -> AnalyticsResult<ComputationOutput<AssetStatistics>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_inputs(returns, risk_free_rate, periods_per_year)?;

    let values = returns.values();
    let n = values.len();
    let ppy = periods_per_year as f64;

    let mean_return = mean(values);
    let variance = sample_variance(values, mean_return);
    let std_dev = variance.sqrt();

    let annualized_return = mean_return * ppy;
    let annualized_volatility = std_dev * ppy.sqrt();
    let sharpe_ratio = SharpeRatio::compute(annualized_return, risk_free_rate, annualized_volatility);

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let median_return = percentile_sorted(&sorted, 50.0);

    let moments = central_moments(values, mean_return);
    let degenerate = moments.m2.sqrt() <= VOLATILITY_EPSILON;

    let (skewness, kurtosis, jarque_bera) = if degenerate {
        warnings.push(format!(
            "{}: zero volatility, Sharpe ratio and higher moments undefined",
            returns.ticker()
        ));
        tracing::warn!(ticker = returns.ticker(), "degenerate return distribution");
        (None, None, None)
    } else {
        let g1 = moments.m3 / moments.m2.powf(1.5);
        let g2 = moments.m4 / (moments.m2 * moments.m2) - 3.0;
        (Some(g1), Some(g2), Some(jarque_bera_test(n, g1, g2)?))
    };

    if n < 30 {
        warnings.push(format!(
            "{}: only {} observations, estimates are noisy",
            returns.ticker(),
            n
        ));
    }

    let output = AssetStatistics {
        ticker: returns.ticker().to_string(),
        observations: n,
        mean_return,
        median_return,
        variance,
        annualized_return,
        annualized_volatility,
        sharpe_ratio,
        skewness,
        kurtosis,
        normal_fit: NormalFit {
            mean: mean_return,
            std_dev: moments.m2.sqrt(),
        },
        jarque_bera,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Return statistics (sample variance, Fisher moments)",
        &serde_json::json!({
            "ticker": returns.ticker(),
            "return_method": returns.method(),
            "risk_free_rate": risk_free_rate,
            "periods_per_year": periods_per_year,
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Statistics for many tickers, computed in parallel. Output order matches
/// input order.
pub fn compute_statistics_batch(
    series: &[ReturnSeries],
    risk_free_rate: Rate,
    periods_per_year: u32,
    cancel: &CancellationToken,
) -> AnalyticsResult<Vec<ComputationOutput<AssetStatistics>>> {
    // Fail fast on bad input before spawning any work.
    for s in series {
        validate_inputs(s, risk_free_rate, periods_per_year)?;
    }

    series
        .par_iter()
        .map(|s| {
            cancel.check()?;
            compute_statistics(s, risk_free_rate, periods_per_year)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n-1) variance.
pub(crate) fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Percentile of a **sorted** slice using linear interpolation.
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = p / 100.0 * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                let frac = rank - lower as f64;
                sorted[lower] + (sorted[upper] - sorted[lower]) * frac
            }
        }
    }
}

struct CentralMoments {
    m2: f64,
    m3: f64,
    m4: f64,
}

/// Biased (divide by n) central moments.
fn central_moments(values: &[f64], mean: f64) -> CentralMoments {
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    CentralMoments {
        m2: m2 / n,
        m3: m3 / n,
        m4: m4 / n,
    }
}

fn jarque_bera_test(n: usize, skewness: f64, excess_kurtosis: f64) -> AnalyticsResult<NormalityTest> {
    let statistic = n as f64 / 6.0 * (skewness.powi(2) + excess_kurtosis.powi(2) / 4.0);
    let chi2 = ChiSquared::new(2.0).map_err(|e| {
        AnalyticsError::invalid_input("jarque_bera", format!("Invalid chi-squared parameters: {e}"))
    })?;
    Ok(NormalityTest {
        statistic,
        p_value: 1.0 - chi2.cdf(statistic),
    })
}

fn validate_inputs(returns: &ReturnSeries, risk_free_rate: Rate, periods_per_year: u32) -> AnalyticsResult<()> {
    if returns.len() < 2 {
        return Err(AnalyticsError::insufficient_data(
            format!("statistics of {}", returns.ticker()),
            2,
            returns.len(),
        ));
    }
    if periods_per_year < 1 {
        return Err(AnalyticsError::invalid_input(
            "periods_per_year",
            "Periods per year must be at least 1",
        ));
    }
    if !risk_free_rate.is_finite() {
        return Err(AnalyticsError::invalid_input(
            "risk_free_rate",
            "Risk-free rate must be finite",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReturnMethod;
    use chrono::{Duration, NaiveDate};

    fn series(values: &[f64]) -> ReturnSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let dates = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        ReturnSeries::new("TEST", ReturnMethod::Simple, dates, values.to_vec()).unwrap()
    }

    #[test]
    fn test_annualisation() {
        let s = series(&[0.01, -0.01, 0.02, 0.0]);
        let out = compute_statistics(&s, 0.0, 252).unwrap().result;
        let mean = 0.005;
        let var = ((0.005f64).powi(2) + 0.015f64.powi(2) + 0.015f64.powi(2) + 0.005f64.powi(2)) / 3.0;
        assert!((out.mean_return - mean).abs() < 1e-12);
        assert!((out.annualized_return - mean * 252.0).abs() < 1e-10);
        assert!((out.annualized_volatility - var.sqrt() * 252f64.sqrt()).abs() < 1e-10);
        assert!((out.median_return - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_sharpe_uses_annual_figures() {
        let s = series(&[0.01, -0.005, 0.02, 0.003, -0.001]);
        let out = compute_statistics(&s, 0.03, 12).unwrap().result;
        let expected = (out.annualized_return - 0.03) / out.annualized_volatility;
        assert!((out.sharpe_ratio.value("TEST").unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_constant_series_is_degenerate_not_error() {
        let s = series(&[0.0; 10]);
        let out = compute_statistics(&s, 0.04, 252).unwrap();
        assert_eq!(out.result.annualized_volatility, 0.0);
        assert_eq!(out.result.sharpe_ratio, SharpeRatio::Undefined);
        assert!(out.result.skewness.is_none());
        assert!(out.result.kurtosis.is_none());
        assert!(out.warnings.iter().any(|w| w.contains("zero volatility")));
    }

    #[test]
    fn test_symmetric_series_has_zero_skew() {
        let s = series(&[-0.02, -0.01, 0.0, 0.01, 0.02]);
        let out = compute_statistics(&s, 0.0, 252).unwrap().result;
        assert!(out.skewness.unwrap().abs() < 1e-12);
        // Uniform-like spacing: m4/m2^2 = 1.7, excess = -1.3
        assert!((out.kurtosis.unwrap() + 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_right_tail_gives_positive_skew() {
        let s = series(&[0.0, 0.0, 0.0, 0.0, 0.1]);
        let out = compute_statistics(&s, 0.0, 252).unwrap().result;
        assert!(out.skewness.unwrap() > 0.0);
        let jb = out.jarque_bera.unwrap();
        assert!(jb.statistic > 0.0);
        assert!(jb.p_value > 0.0 && jb.p_value < 1.0);
    }

    #[test]
    fn test_single_observation_is_insufficient() {
        let s = series(&[0.01]);
        assert!(matches!(
            compute_statistics(&s, 0.0, 252),
            Err(AnalyticsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_batch_preserves_order() {
        let a = series(&[0.01, 0.02, 0.03]);
        let b = series(&[-0.01, -0.02, -0.03]);
        let out = compute_statistics_batch(&[a, b], 0.0, 252, &CancellationToken::new()).unwrap();
        assert!(out[0].result.mean_return > 0.0);
        assert!(out[1].result.mean_return < 0.0);
    }

    #[test]
    fn test_batch_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let a = series(&[0.01, 0.02, 0.03]);
        assert!(matches!(
            compute_statistics_batch(&[a], 0.0, 252, &token),
            Err(AnalyticsError::Cancelled)
        ));
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile_sorted(&sorted, 50.0) - 2.5).abs() < 1e-12);
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 4.0);
    }
}
