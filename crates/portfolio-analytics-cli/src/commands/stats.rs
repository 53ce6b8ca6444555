use clap::Args;
use serde_json::{json, Value};

use portfolio_analytics_core::covariance::build_model;
use portfolio_analytics_core::returns::{compute_statistics_batch, AssetStatistics};
use portfolio_analytics_core::workflows::PortfolioAnalysisInput;
use portfolio_analytics_core::{with_metadata, CancellationToken, ComputationOutput, ReturnMethod, ReturnSeries};

use super::{load_input, prepare_returns, InputArgs};

/// Arguments for per-asset descriptive statistics
#[derive(Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub common: InputArgs,
}

/// Arguments for estimating the annualized covariance model
#[derive(Args)]
pub struct ModelArgs {
    #[command(flatten)]
    pub common: InputArgs,
}

/// Load a price document and turn it into return series, honouring CLI
/// overrides of the document's return settings.
pub fn load_returns(
    common: &InputArgs,
    what: &str,
) -> Result<(PortfolioAnalysisInput, Vec<ReturnSeries>), Box<dyn std::error::Error>> {
    let doc: PortfolioAnalysisInput = load_input(&common.input, what)?;
    doc.config.validate()?;
    let method = common.method.map(ReturnMethod::from).unwrap_or(doc.return_method);
    let returns = prepare_returns(&doc.prices, method, doc.align_dates || common.align_dates)?;
    Ok((doc, returns))
}

pub fn run_stats(args: StatsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let (doc, returns) = load_returns(&args.common, "statistics")?;
    let outputs = compute_statistics_batch(
        &returns,
        doc.config.risk_free_rate,
        doc.config.periods_per_year,
        &CancellationToken::new(),
    )?;
    Ok(serde_json::to_value(merge_outputs(outputs))?)
}

/// Fold per-ticker envelopes into one, keeping every ticker's assumptions
/// and warnings in input order.
fn merge_outputs(outputs: Vec<ComputationOutput<AssetStatistics>>) -> ComputationOutput<Vec<AssetStatistics>> {
    let methodology = outputs
        .first()
        .map(|o| o.methodology.clone())
        .unwrap_or_default();
    let elapsed: u64 = outputs.iter().map(|o| o.metadata.computation_time_us).sum();

    let mut results = Vec::with_capacity(outputs.len());
    let mut assumptions = Vec::with_capacity(outputs.len());
    let mut warnings = Vec::new();
    for out in outputs {
        assumptions.push(out.assumptions);
        warnings.extend(out.warnings);
        results.push(out.result);
    }
    with_metadata(&methodology, &assumptions, warnings, elapsed, results)
}

pub fn run_model(args: ModelArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let (doc, returns) = load_returns(&args.common, "covariance model")?;
    let model = build_model(&returns, doc.config.periods_per_year)?;
    Ok(json!({
        "result": {
            "model": model,
            "volatilities": model.volatilities(),
            "correlation_matrix": model.correlation_matrix(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_analytics_core::returns::compute_statistics;

    fn series(ticker: &str, values: &[f64]) -> ReturnSeries {
        let dates: Vec<String> = (0..values.len()).map(|i| format!("2024-02-{:02}", i + 1)).collect();
        serde_json::from_value(json!({
            "ticker": ticker,
            "method": "simple",
            "dates": dates,
            "values": values,
        }))
        .unwrap()
    }

    #[test]
    fn test_merged_statistics_keep_the_envelope() {
        let outputs = vec![
            compute_statistics(&series("AAA", &[0.01, -0.02, 0.015, 0.003]), 0.02, 252).unwrap(),
            compute_statistics(&series("CASH", &[0.0, 0.0, 0.0]), 0.02, 252).unwrap(),
        ];
        let expected_warnings: Vec<String> = outputs.iter().flat_map(|o| o.warnings.clone()).collect();

        let merged = merge_outputs(outputs);
        let tickers: Vec<&str> = merged.result.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAA", "CASH"]);
        assert_eq!(merged.warnings, expected_warnings);
        assert_eq!(merged.metadata.precision, "ieee754_f64");
        assert!(!merged.methodology.is_empty());

        let value = serde_json::to_value(&merged).unwrap();
        assert_eq!(value["assumptions"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["result"][1]["ticker"], "CASH");
    }
}
