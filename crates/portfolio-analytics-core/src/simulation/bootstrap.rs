use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::config::SimulationConfig;
use crate::error::AnalyticsError;
use crate::returns::statistics::percentile_sorted;
use crate::types::{with_metadata, ComputationOutput, Portfolio, ReturnSeries};
use crate::AnalyticsResult;

const HISTOGRAM_BINS: usize = 20;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What to resample: one asset's history, or a fixed-weight portfolio over
/// aligned histories.
#[derive(Debug, Clone, Copy)]
pub enum SimulationTarget<'a> {
    SingleAsset(&'a ReturnSeries),
    Portfolio {
        series: &'a [ReturnSeries],
        portfolio: &'a Portfolio,
    },
}

/// Percentile summary of terminal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimPercentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

/// A single histogram bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
    pub frequency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub num_paths: usize,
    pub horizon_periods: usize,
    pub initial_value: f64,
    /// Cumulative value at the horizon, one per trial in trial order.
    pub terminal_values: Vec<f64>,
    /// Value after each period for every trial (`keep_paths` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<Vec<f64>>>,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: SimPercentiles,
    /// Share of trials ending below the initial value.
    pub probability_of_loss: f64,
    /// 5th-percentile loss of the terminal return, floored at zero.
    pub var_95: f64,
    /// Mean loss of trials at or below the 5th percentile, floored at zero.
    pub cvar_95: f64,
    /// Distribution of terminal returns (value / initial - 1).
    pub histogram: Vec<HistogramBin>,
    /// Distribution of every simulated per-period return across all paths
    /// (`period_histogram` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_histogram: Option<Vec<HistogramBin>>,
    /// Base seed; rerunning with it reproduces this result exactly.
    pub seed: u64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Historical bootstrap simulation.
///
/// Every trial draws `horizon_periods` period indices uniformly with
/// replacement from the history and compounds the corresponding (portfolio)
/// returns from `initial_value`. A portfolio draw takes the whole
/// cross-section at the index, so cross-asset dependence is preserved.
/// Trial `k` uses its own generator seeded from `(seed, k)`, which makes
/// seeded runs identical regardless of thread scheduling.
pub fn simulate(
    target: SimulationTarget<'_>,
    config: &SimulationConfig,
    cancel: &CancellationToken,
) -> AnalyticsResult<ComputationOutput<SimulationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    config.validate()?;
    let (label, history) = period_returns(target)?;
    if history.len() < config.min_observations {
        return Err(AnalyticsError::insufficient_data(
            format!("bootstrap of {label}"),
            config.min_observations,
            history.len(),
        ));
    }
    if config.horizon_periods > history.len() {
        warnings.push(format!(
            "Horizon of {} periods exceeds the {} observed periods; draws repeat by construction",
            config.horizon_periods,
            history.len()
        ));
    }

    let seed = match config.seed {
        Some(s) => s,
        None => {
            let s: u64 = rand::thread_rng().gen();
            warnings.push(format!("No seed supplied; drew base seed {s}"));
            s
        }
    };

    let _span = tracing::debug_span!(
        "bootstrap",
        subject = %label,
        paths = config.num_paths,
        horizon = config.horizon_periods,
        seed
    )
    .entered();

    // Every draw is a historical value, so the history's range fixes the
    // per-period bins before any trial runs.
    let period_layout = config.period_histogram.then(|| BinLayout::over(&history, HISTOGRAM_BINS));
    let history_bins: Option<Vec<usize>> = period_layout
        .as_ref()
        .map(|layout| history.iter().map(|r| layout.index(*r)).collect());

    let trials: Vec<Trial> = (0..config.num_paths)
        .into_par_iter()
        .map(|k| -> AnalyticsResult<Trial> {
            cancel.check()?;
            Ok(run_trial(&history, history_bins.as_deref(), config, trial_seed(seed, k as u64)))
        })
        .collect::<AnalyticsResult<Vec<_>>>()?;

    let mut terminal_values = Vec::with_capacity(trials.len());
    let mut paths = config.keep_paths.then(|| Vec::with_capacity(trials.len()));
    let mut period_counts = period_layout.as_ref().map(|layout| vec![0u64; layout.bins]);
    for trial in trials {
        terminal_values.push(trial.terminal);
        if let (Some(all), Some(path)) = (paths.as_mut(), trial.path) {
            all.push(path);
        }
        if let (Some(total), Some(counts)) = (period_counts.as_mut(), trial.period_counts) {
            for (t, c) in total.iter_mut().zip(counts) {
                *t += c;
            }
        }
    }

    let mut result = summarize(terminal_values, paths, config, seed);
    if let (Some(layout), Some(counts)) = (period_layout, period_counts) {
        result.period_histogram = Some(layout.to_bins(&counts));
    }
    tracing::debug!(
        mean = result.mean,
        p5 = result.percentiles.p5,
        p95 = result.percentiles.p95,
        "bootstrap complete"
    );

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Historical Bootstrap Simulation (resampling with replacement)",
        &serde_json::json!({
            "target": label,
            "observations": history.len(),
            "num_paths": config.num_paths,
            "horizon_periods": config.horizon_periods,
            "initial_value": config.initial_value,
            "seed": seed,
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Per-period simple return of the target, plus a label for messages.
fn period_returns(target: SimulationTarget<'_>) -> AnalyticsResult<(String, Vec<f64>)> {
    match target {
        SimulationTarget::SingleAsset(series) => {
            let method = series.method();
            Ok((
                series.ticker().to_string(),
                series.values().iter().map(|r| method.to_simple(*r)).collect(),
            ))
        }
        SimulationTarget::Portfolio { series, portfolio } => {
            validate_portfolio(series, portfolio)?;
            let t = series[0].len();
            let mut history = vec![0.0; t];
            for (s, w) in series.iter().zip(portfolio.weights.iter()) {
                let method = s.method();
                for (acc, r) in history.iter_mut().zip(s.values().iter()) {
                    *acc += w * method.to_simple(*r);
                }
            }
            Ok((format!("portfolio of {} assets", series.len()), history))
        }
    }
}

fn validate_portfolio(series: &[ReturnSeries], portfolio: &Portfolio) -> AnalyticsResult<()> {
    let Some(first) = series.first() else {
        return Err(AnalyticsError::insufficient_data("portfolio bootstrap", 1, 0));
    };
    if portfolio.weights.len() != portfolio.tickers.len() || portfolio.tickers.len() != series.len() {
        return Err(AnalyticsError::invalid_input(
            "portfolio",
            format!(
                "Portfolio has {} tickers and {} weights for {} series",
                portfolio.tickers.len(),
                portfolio.weights.len(),
                series.len()
            ),
        ));
    }
    for (i, (s, t)) in series.iter().zip(portfolio.tickers.iter()).enumerate() {
        if s.ticker() != t {
            return Err(AnalyticsError::invalid_input(
                format!("portfolio.tickers[{i}]"),
                format!("Expected {} (series order) but got {}", s.ticker(), t),
            ));
        }
    }
    if portfolio.weights.iter().any(|w| !w.is_finite()) {
        return Err(AnalyticsError::invalid_input("portfolio.weights", "Weights must be finite"));
    }
    let sum = portfolio.weight_sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(AnalyticsError::invalid_input(
            "portfolio.weights",
            format!("Weights must sum to 1, got {sum:.8}"),
        ));
    }
    for s in &series[1..] {
        if s.dates() != first.dates() {
            return Err(AnalyticsError::misaligned(
                s.ticker(),
                format!(
                    "{} observations do not share dates with {} ({} observations)",
                    s.len(),
                    first.ticker(),
                    first.len()
                ),
            ));
        }
    }
    Ok(())
}

/// SplitMix64 finalizer over (base seed, trial index).
fn trial_seed(seed: u64, trial: u64) -> u64 {
    let mut z = seed ^ trial.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

struct Trial {
    terminal: f64,
    path: Option<Vec<f64>>,
    period_counts: Option<Vec<u64>>,
}

/// One resampled path. `history_bins[i]` is the period-histogram bin of
/// `history[i]`, when that histogram is requested.
fn run_trial(history: &[f64], history_bins: Option<&[usize]>, config: &SimulationConfig, seed: u64) -> Trial {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut value = config.initial_value;
    let mut path = config.keep_paths.then(|| Vec::with_capacity(config.horizon_periods));
    let mut period_counts = history_bins.map(|_| vec![0u64; HISTOGRAM_BINS]);
    for _ in 0..config.horizon_periods {
        let idx = rng.gen_range(0..history.len());
        value *= 1.0 + history[idx];
        if let Some(ref mut p) = path {
            p.push(value);
        }
        if let (Some(counts), Some(bins)) = (period_counts.as_mut(), history_bins) {
            counts[bins[idx]] += 1;
        }
    }
    Trial {
        terminal: value,
        path,
        period_counts,
    }
}

fn summarize(terminal_values: Vec<f64>, paths: Option<Vec<Vec<f64>>>, config: &SimulationConfig, seed: u64) -> SimulationResult {
    let mut sorted = terminal_values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let initial = config.initial_value;

    let mean = sorted.iter().sum::<f64>() / n;
    let std_dev = (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let percentiles = SimPercentiles {
        p5: percentile_sorted(&sorted, 5.0),
        p10: percentile_sorted(&sorted, 10.0),
        p25: percentile_sorted(&sorted, 25.0),
        p50: percentile_sorted(&sorted, 50.0),
        p75: percentile_sorted(&sorted, 75.0),
        p90: percentile_sorted(&sorted, 90.0),
        p95: percentile_sorted(&sorted, 95.0),
    };

    let probability_of_loss = sorted.iter().filter(|v| **v < initial).count() as f64 / n;

    let terminal_returns: Vec<f64> = sorted.iter().map(|v| v / initial - 1.0).collect();
    let p5_return = percentile_sorted(&terminal_returns, 5.0);
    let var_95 = (-p5_return).max(0.0);
    let tail: Vec<f64> = terminal_returns.iter().copied().take_while(|r| *r <= p5_return).collect();
    let cvar_95 = if tail.is_empty() {
        var_95
    } else {
        (-(tail.iter().sum::<f64>() / tail.len() as f64)).max(0.0)
    };

    SimulationResult {
        num_paths: config.num_paths,
        horizon_periods: config.horizon_periods,
        initial_value: initial,
        median: percentiles.p50,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std_dev,
        percentiles,
        probability_of_loss,
        var_95,
        cvar_95,
        histogram: build_histogram(&terminal_returns, HISTOGRAM_BINS),
        period_histogram: None,
        terminal_values,
        paths,
        seed,
    }
}

/// Equal-width bins spanning `[min, max]` of some sample; a single bin when
/// the sample is constant.
struct BinLayout {
    min: f64,
    max: f64,
    width: f64,
    bins: usize,
}

impl BinLayout {
    fn over(values: &[f64], num_bins: usize) -> Self {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if (max - min).abs() < f64::EPSILON {
            return Self { min, max, width: 0.0, bins: 1 };
        }
        Self {
            min,
            max,
            width: (max - min) / num_bins as f64,
            bins: num_bins,
        }
    }

    fn index(&self, v: f64) -> usize {
        if self.bins == 1 {
            return 0;
        }
        (((v - self.min) / self.width).floor() as usize).min(self.bins - 1)
    }

    fn to_bins(&self, counts: &[u64]) -> Vec<HistogramBin> {
        let total = counts.iter().sum::<u64>().max(1) as f64;
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| HistogramBin {
                lower: self.min + i as f64 * self.width,
                upper: if i == self.bins - 1 { self.max } else { self.min + (i + 1) as f64 * self.width },
                count,
                frequency: count as f64 / total,
            })
            .collect()
    }
}

fn build_histogram(values: &[f64], num_bins: usize) -> Vec<HistogramBin> {
    let layout = BinLayout::over(values, num_bins);
    let mut counts = vec![0u64; layout.bins];
    for &v in values {
        counts[layout.index(v)] += 1;
    }
    layout.to_bins(&counts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReturnMethod;
    use chrono::{Days, NaiveDate};
    use pretty_assertions::assert_eq;

    fn series(ticker: &str, values: Vec<f64>) -> ReturnSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let dates = (0..values.len())
            .map(|i| start.checked_add_days(Days::new(i as u64)).unwrap())
            .collect();
        ReturnSeries::new(ticker, ReturnMethod::Simple, dates, values).unwrap()
    }

    fn noisy(ticker: &str, n: usize, phase: f64) -> ReturnSeries {
        series(ticker, (0..n).map(|i| 0.01 * ((i as f64) * 0.7 + phase).sin()).collect())
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let s = noisy("AAA", 100, 0.0);
        let cfg = SimulationConfig::new(500, 60, Some(42));
        let a = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()).unwrap();
        let b = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()).unwrap();
        assert_eq!(a.result, b.result);
        assert_eq!(a.result.seed, 42);
    }

    #[test]
    fn test_different_seeds_differ() {
        let s = noisy("AAA", 100, 0.0);
        let a = simulate(
            SimulationTarget::SingleAsset(&s),
            &SimulationConfig::new(200, 30, Some(1)),
            &CancellationToken::new(),
        )
        .unwrap();
        let b = simulate(
            SimulationTarget::SingleAsset(&s),
            &SimulationConfig::new(200, 30, Some(2)),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_ne!(a.result.terminal_values, b.result.terminal_values);
    }

    #[test]
    fn test_zero_returns_give_flat_distribution() {
        let s = series("FLAT", vec![0.0; 252]);
        let cfg = SimulationConfig::new(100, 252, Some(7));
        let out = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()).unwrap();
        let p = &out.result.percentiles;
        for v in [p.p5, p.p10, p.p25, p.p50, p.p75, p.p90, p.p95] {
            assert_eq!(v, 1.0);
        }
        assert_eq!(out.result.probability_of_loss, 0.0);
        assert_eq!(out.result.var_95, 0.0);
        assert_eq!(out.result.histogram.len(), 1);
    }

    #[test]
    fn test_constant_returns_compound_deterministically() {
        let s = series("CONST", vec![0.001; 60]);
        let cfg = SimulationConfig::new(50, 252, None);
        let out = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()).unwrap();
        let expected = 1.001f64.powi(252);
        assert!((out.result.mean - expected).abs() < 1e-9);
        assert!(out.result.std_dev < 1e-9);
        // Unseeded runs report the drawn seed and a horizon warning.
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn test_insufficient_history() {
        let s = series("SHORT", vec![0.01; 10]);
        let cfg = SimulationConfig::new(10, 5, Some(1));
        assert!(matches!(
            simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()),
            Err(AnalyticsError::InsufficientData { required: 30, available: 10, .. })
        ));
    }

    #[test]
    fn test_portfolio_uses_weighted_cross_section() {
        let a = series("A", vec![0.002; 40]);
        let b = series("B", vec![-0.001; 40]);
        let portfolio = Portfolio::new(vec!["A".into(), "B".into()], vec![0.5, 0.5]).unwrap();
        let data = [a, b];
        let cfg = SimulationConfig::new(20, 10, Some(3));
        let out = simulate(
            SimulationTarget::Portfolio {
                series: &data,
                portfolio: &portfolio,
            },
            &cfg,
            &CancellationToken::new(),
        )
        .unwrap();
        let expected = 1.0005f64.powi(10);
        assert!(out.result.terminal_values.iter().all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn test_portfolio_misaligned_series() {
        let a = series("A", vec![0.001; 40]);
        let b = series("B", vec![0.001; 41]);
        let portfolio = Portfolio::new(vec!["A".into(), "B".into()], vec![0.5, 0.5]).unwrap();
        let data = [a, b];
        let result = simulate(
            SimulationTarget::Portfolio {
                series: &data,
                portfolio: &portfolio,
            },
            &SimulationConfig::new(10, 5, Some(1)),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(AnalyticsError::MisalignedSeries { .. })));
    }

    #[test]
    fn test_portfolio_ticker_order_mismatch() {
        let data = [noisy("A", 40, 0.0), noisy("B", 40, 1.0)];
        let portfolio = Portfolio::new(vec!["B".into(), "A".into()], vec![0.5, 0.5]).unwrap();
        let result = simulate(
            SimulationTarget::Portfolio {
                series: &data,
                portfolio: &portfolio,
            },
            &SimulationConfig::new(10, 5, Some(1)),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(AnalyticsError::InvalidInput { .. })));
    }

    #[test]
    fn test_keep_paths() {
        let s = noisy("AAA", 50, 0.3);
        let mut cfg = SimulationConfig::new(8, 12, Some(9));
        cfg.keep_paths = true;
        let out = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new()).unwrap();
        let paths = out.result.paths.as_ref().unwrap();
        assert_eq!(paths.len(), 8);
        for (path, terminal) in paths.iter().zip(out.result.terminal_values.iter()) {
            assert_eq!(path.len(), 12);
            assert_eq!(path.last(), Some(terminal));
        }
    }

    #[test]
    fn test_risk_measures_ordered() {
        let s = noisy("AAA", 120, 0.1);
        let cfg = SimulationConfig::new(1000, 40, Some(11));
        let r = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new())
            .unwrap()
            .result;
        let p = &r.percentiles;
        assert!(p.p5 <= p.p10 && p.p10 <= p.p25 && p.p25 <= p.p50);
        assert!(p.p50 <= p.p75 && p.p75 <= p.p90 && p.p90 <= p.p95);
        assert!(r.cvar_95 >= r.var_95);
        let total: u64 = r.histogram.iter().map(|b| b.count).sum();
        assert_eq!(total, 1000);
        assert_eq!(r.period_histogram, None);
    }

    #[test]
    fn test_period_histogram_counts_every_draw() {
        let s = noisy("AAA", 120, 0.1);
        let mut cfg = SimulationConfig::new(300, 40, Some(5));
        cfg.period_histogram = true;
        let r = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new())
            .unwrap()
            .result;
        let bins = r.period_histogram.as_ref().unwrap();
        assert_eq!(bins.len(), HISTOGRAM_BINS);
        assert_eq!(bins.iter().map(|b| b.count).sum::<u64>(), 300 * 40);
        assert!((bins.iter().map(|b| b.frequency).sum::<f64>() - 1.0).abs() < 1e-12);

        // Bins span exactly the historical range.
        let lo = s.values().iter().copied().fold(f64::INFINITY, f64::min);
        let hi = s.values().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(bins[0].lower, lo);
        assert_eq!(bins[bins.len() - 1].upper, hi);

        // The terminal summary does not depend on the extra bookkeeping.
        cfg.period_histogram = false;
        let plain = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new())
            .unwrap()
            .result;
        assert_eq!(plain.terminal_values, r.terminal_values);
    }

    #[test]
    fn test_period_histogram_of_constant_returns() {
        let s = series("CONST", vec![0.001; 40]);
        let mut cfg = SimulationConfig::new(10, 7, Some(2));
        cfg.period_histogram = true;
        let r = simulate(SimulationTarget::SingleAsset(&s), &cfg, &CancellationToken::new())
            .unwrap()
            .result;
        let bins = r.period_histogram.unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 70);
        assert_eq!(bins[0].frequency, 1.0);
    }

    #[test]
    fn test_cancelled_simulation() {
        let s = noisy("AAA", 50, 0.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = simulate(SimulationTarget::SingleAsset(&s), &SimulationConfig::new(10, 5, Some(1)), &cancel);
        assert!(matches!(result, Err(AnalyticsError::Cancelled)));
    }
}
