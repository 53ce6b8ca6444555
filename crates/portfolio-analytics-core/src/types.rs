use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;
use crate::AnalyticsResult;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = f64;

/// Ticker identifier as supplied by the price data provider.
pub type Ticker = String;

/// Volatility at or below this level is treated as zero.
pub const VOLATILITY_EPSILON: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Price and return series
// ---------------------------------------------------------------------------

/// A single adjusted-close observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct PriceSeriesData {
    ticker: Ticker,
    points: Vec<PricePoint>,
}

/// Adjusted-close history for one ticker. Dates strictly increase and every
/// price is finite and positive; the series cannot be modified once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceSeriesData")]
pub struct PriceSeries {
    ticker: Ticker,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<Ticker>, points: Vec<PricePoint>) -> AnalyticsResult<Self> {
        let ticker = ticker.into();
        if ticker.trim().is_empty() {
            return Err(AnalyticsError::invalid_input(
                "ticker",
                "Ticker must not be empty",
            ));
        }
        for (i, p) in points.iter().enumerate() {
            if !p.price.is_finite() || p.price <= 0.0 {
                return Err(AnalyticsError::invalid_input(
                    format!("{ticker}.points[{i}]"),
                    format!("Price must be finite and positive, got {}", p.price),
                ));
            }
        }
        check_increasing(&ticker, points.iter().map(|p| p.date))?;
        Ok(Self { ticker, points })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl TryFrom<PriceSeriesData> for PriceSeries {
    type Error = AnalyticsError;

    fn try_from(data: PriceSeriesData) -> Result<Self, Self::Error> {
        PriceSeries::new(data.ticker, data.points)
    }
}

/// How periodic returns are derived from consecutive prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMethod {
    /// p1 / p0 - 1
    #[default]
    Simple,
    /// ln(p1 / p0)
    Log,
}

impl ReturnMethod {
    /// Convert a periodic return of this kind into a simple return.
    pub fn to_simple(self, r: f64) -> f64 {
        match self {
            ReturnMethod::Simple => r,
            ReturnMethod::Log => r.exp_m1(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReturnSeriesData {
    ticker: Ticker,
    #[serde(default)]
    method: ReturnMethod,
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

/// Periodic returns for one ticker. `dates[i]` is the date of the price that
/// closes period `i`, so the series is one shorter than its price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReturnSeriesData")]
pub struct ReturnSeries {
    ticker: Ticker,
    method: ReturnMethod,
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(
        ticker: impl Into<Ticker>,
        method: ReturnMethod,
        dates: Vec<NaiveDate>,
        values: Vec<f64>,
    ) -> AnalyticsResult<Self> {
        let ticker = ticker.into();
        if dates.len() != values.len() {
            return Err(AnalyticsError::invalid_input(
                format!("{ticker}.values"),
                format!(
                    "Expected {} values to match dates but got {}",
                    dates.len(),
                    values.len()
                ),
            ));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(AnalyticsError::invalid_input(
                format!("{ticker}.values[{i}]"),
                "Return must be finite",
            ));
        }
        check_increasing(&ticker, dates.iter().copied())?;
        Ok(Self {
            ticker,
            method,
            dates,
            values,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn method(&self) -> ReturnMethod {
        self.method
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<ReturnSeriesData> for ReturnSeries {
    type Error = AnalyticsError;

    fn try_from(data: ReturnSeriesData) -> Result<Self, Self::Error> {
        ReturnSeries::new(data.ticker, data.method, data.dates, data.values)
    }
}

fn check_increasing(
    ticker: &str,
    mut dates: impl Iterator<Item = NaiveDate>,
) -> AnalyticsResult<()> {
    let Some(mut prev) = dates.next() else {
        return Ok(());
    };
    for (i, d) in dates.enumerate() {
        if d <= prev {
            return Err(AnalyticsError::invalid_input(
                format!("{ticker}.dates[{}]", i + 1),
                format!("Dates must be strictly increasing ({d} follows {prev})"),
            ));
        }
        prev = d;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Portfolios and ratios
// ---------------------------------------------------------------------------

/// Weights over an ordered set of tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub tickers: Vec<Ticker>,
    pub weights: Vec<f64>,
}

impl Portfolio {
    pub fn new(tickers: Vec<Ticker>, weights: Vec<f64>) -> AnalyticsResult<Self> {
        if tickers.len() != weights.len() {
            return Err(AnalyticsError::invalid_input(
                "weights",
                format!("Expected {} weights but got {}", tickers.len(), weights.len()),
            ));
        }
        Ok(Self { tickers, weights })
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn weight_of(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }
}

/// Sharpe ratio, or an explicit marker when volatility is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharpeRatio {
    Defined(f64),
    Undefined,
}

impl SharpeRatio {
    pub fn compute(expected_return: Rate, risk_free_rate: Rate, volatility: f64) -> Self {
        if volatility <= VOLATILITY_EPSILON {
            SharpeRatio::Undefined
        } else {
            SharpeRatio::Defined((expected_return - risk_free_rate) / volatility)
        }
    }

    pub fn as_option(&self) -> Option<f64> {
        match self {
            SharpeRatio::Defined(s) => Some(*s),
            SharpeRatio::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, SharpeRatio::Defined(_))
    }

    /// Defined value, or `DegenerateDistribution` for callers that treat a
    /// zero-volatility asset as a failure.
    pub fn value(&self, subject: &str) -> AnalyticsResult<f64> {
        self.as_option()
            .ok_or_else(|| AnalyticsError::DegenerateDistribution {
                subject: subject.to_string(),
                reason: "Sharpe ratio undefined for zero volatility".into(),
            })
    }

    /// Ordering key where `Undefined` ranks below every defined value.
    pub(crate) fn rank_key(&self) -> f64 {
        self.as_option().unwrap_or(f64::NEG_INFINITY)
    }
}

// ---------------------------------------------------------------------------
// Output envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_price_series_rejects_duplicate_dates() {
        let points = vec![
            PricePoint { date: d(2), price: 10.0 },
            PricePoint { date: d(2), price: 11.0 },
        ];
        assert!(PriceSeries::new("AAA", points).is_err());
    }

    #[test]
    fn test_price_series_rejects_non_positive_price() {
        let points = vec![
            PricePoint { date: d(2), price: 10.0 },
            PricePoint { date: d(3), price: 0.0 },
        ];
        assert!(PriceSeries::new("AAA", points).is_err());
    }

    #[test]
    fn test_price_series_deserialize_validates() {
        let json = r#"{"ticker":"AAA","points":[
            {"date":"2024-01-03","price":10.0},
            {"date":"2024-01-02","price":11.0}]}"#;
        let parsed: Result<PriceSeries, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_sharpe_undefined_for_zero_volatility() {
        let s = SharpeRatio::compute(0.05, 0.02, 0.0);
        assert_eq!(s, SharpeRatio::Undefined);
        assert!(matches!(
            s.value("AAA"),
            Err(AnalyticsError::DegenerateDistribution { .. })
        ));
    }

    #[test]
    fn test_sharpe_defined() {
        let s = SharpeRatio::compute(0.10, 0.02, 0.2);
        assert!((s.value("AAA").unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_log_return_to_simple() {
        let r = ReturnMethod::Log.to_simple((1.1f64).ln());
        assert!((r - 0.1).abs() < 1e-12);
    }
}
