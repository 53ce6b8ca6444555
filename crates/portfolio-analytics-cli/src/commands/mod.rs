pub mod analyze;
pub mod frontier;
pub mod returns;
pub mod simulate;
pub mod stats;

use clap::{Args, ValueEnum};
use serde::de::DeserializeOwned;

use portfolio_analytics_core::returns::{compute_returns, intersect_dates};
use portfolio_analytics_core::{PriceSeries, ReturnMethod, ReturnSeries};

use crate::input;

/// Input options shared by every command that starts from price data.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Path to a JSON or YAML input file (stdin is read when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Restrict all price series to their common dates before computing
    #[arg(long)]
    pub align_dates: bool,

    /// Override the return method given in the input document
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Simple,
    Log,
}

impl From<MethodArg> for ReturnMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Simple => ReturnMethod::Simple,
            MethodArg::Log => ReturnMethod::Log,
        }
    }
}

/// Load the command's input document from `--input` or piped stdin.
pub fn load_input<T: DeserializeOwned>(path: &Option<String>, what: &str) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(ref path) = path {
        input::file::read_document(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err(format!("--input <file.json|file.yaml> or stdin required for {what}").into())
    }
}

/// Prices -> (optionally aligned) return series, in input order.
pub fn prepare_returns(
    prices: &[PriceSeries],
    method: ReturnMethod,
    align_dates: bool,
) -> Result<Vec<ReturnSeries>, Box<dyn std::error::Error>> {
    if prices.is_empty() {
        return Err("Input contains no price series".into());
    }
    let aligned;
    let prices = if align_dates {
        aligned = intersect_dates(prices)?;
        &aligned[..]
    } else {
        prices
    };
    let returns = prices
        .iter()
        .map(|p| compute_returns(p, method))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(series = returns.len(), ?method, align_dates, "computed return series");
    Ok(returns)
}
