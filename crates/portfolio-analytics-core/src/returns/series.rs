use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::error::AnalyticsError;
use crate::types::{PricePoint, PriceSeries, ReturnMethod, ReturnSeries};
use crate::AnalyticsResult;

/// Convert an adjusted-close series into periodic returns.
///
/// The result has one observation per consecutive price pair, dated at the
/// closing price of the period.
pub fn compute_returns(prices: &PriceSeries, method: ReturnMethod) -> AnalyticsResult<ReturnSeries> {
    let points = prices.points();
    if points.len() < 2 {
        return Err(AnalyticsError::insufficient_data(
            format!("returns of {}", prices.ticker()),
            2,
            points.len(),
        ));
    }

    let (dates, values): (Vec<NaiveDate>, Vec<f64>) = points
        .windows(2)
        .map(|pair| {
            let ratio = pair[1].price / pair[0].price;
            let r = match method {
                ReturnMethod::Simple => ratio - 1.0,
                ReturnMethod::Log => ratio.ln(),
            };
            (pair[1].date, r)
        })
        .unzip();

    ReturnSeries::new(prices.ticker(), method, dates, values)
}

/// Restrict every series to the dates present in all of them.
///
/// This is the explicit alignment step callers run before building a
/// covariance model from providers whose calendars differ.
pub fn intersect_dates(series: &[PriceSeries]) -> AnalyticsResult<Vec<PriceSeries>> {
    let Some(first) = series.first() else {
        return Ok(Vec::new());
    };

    let mut common: BTreeSet<NaiveDate> = first.points().iter().map(|p| p.date).collect();
    for s in &series[1..] {
        let dates: BTreeSet<NaiveDate> = s.points().iter().map(|p| p.date).collect();
        common = common.intersection(&dates).copied().collect();
    }

    tracing::debug!(
        tickers = series.len(),
        common_dates = common.len(),
        "intersected price series dates"
    );

    series
        .iter()
        .map(|s| {
            let points: Vec<PricePoint> = s
                .points()
                .iter()
                .filter(|p| common.contains(&p.date))
                .copied()
                .collect();
            PriceSeries::new(s.ticker(), points)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn series(ticker: &str, prices: &[(u32, f64)]) -> PriceSeries {
        let points = prices
            .iter()
            .map(|&(day, price)| PricePoint { date: d(day), price })
            .collect();
        PriceSeries::new(ticker, points).unwrap()
    }

    #[test]
    fn test_simple_returns() {
        let s = series("AAA", &[(1, 100.0), (4, 110.0), (5, 99.0)]);
        let r = compute_returns(&s, ReturnMethod::Simple).unwrap();
        assert_eq!(r.len(), s.len() - 1);
        assert!((r.values()[0] - 0.10).abs() < 1e-12);
        assert!((r.values()[1] + 0.10).abs() < 1e-12);
        assert_eq!(r.dates(), &[d(4), d(5)]);
    }

    #[test]
    fn test_log_returns() {
        let s = series("AAA", &[(1, 100.0), (4, 110.0)]);
        let r = compute_returns(&s, ReturnMethod::Log).unwrap();
        assert!((r.values()[0] - (1.1f64).ln()).abs() < 1e-12);
        assert_eq!(r.method(), ReturnMethod::Log);
    }

    #[test]
    fn test_constant_prices_give_zero_returns() {
        let s = series("FLAT", &[(1, 50.0), (4, 50.0), (5, 50.0), (6, 50.0)]);
        let r = compute_returns(&s, ReturnMethod::Simple).unwrap();
        assert!(r.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_single_price_is_insufficient() {
        let s = series("AAA", &[(1, 100.0)]);
        assert!(matches!(
            compute_returns(&s, ReturnMethod::Simple),
            Err(AnalyticsError::InsufficientData { required: 2, available: 1, .. })
        ));
    }

    #[test]
    fn test_intersect_dates() {
        let a = series("AAA", &[(1, 1.0), (4, 2.0), (5, 3.0), (6, 4.0)]);
        let b = series("BBB", &[(1, 1.0), (5, 2.0), (6, 3.0), (7, 4.0)]);
        let aligned = intersect_dates(&[a, b]).unwrap();
        let dates_a: Vec<NaiveDate> = aligned[0].points().iter().map(|p| p.date).collect();
        let dates_b: Vec<NaiveDate> = aligned[1].points().iter().map(|p| p.date).collect();
        assert_eq!(dates_a, vec![d(1), d(5), d(6)]);
        assert_eq!(dates_a, dates_b);
        assert_eq!(aligned[0].points()[1].price, 3.0);
    }
}
