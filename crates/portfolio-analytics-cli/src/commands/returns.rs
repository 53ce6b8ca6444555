use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use portfolio_analytics_core::{PriceSeries, ReturnMethod};

use super::{load_input, prepare_returns, InputArgs};

/// Arguments for converting prices to periodic returns
#[derive(Args)]
pub struct ReturnsArgs {
    #[command(flatten)]
    pub common: InputArgs,
}

/// Price series with return settings; no analytics configuration needed.
#[derive(Debug, Serialize, Deserialize)]
struct PriceDocument {
    prices: Vec<PriceSeries>,
    #[serde(default)]
    return_method: ReturnMethod,
    #[serde(default)]
    align_dates: bool,
}

pub fn run_returns(args: ReturnsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let doc: PriceDocument = load_input(&args.common.input, "returns")?;
    let method = args.common.method.map(ReturnMethod::from).unwrap_or(doc.return_method);
    let returns = prepare_returns(&doc.prices, method, doc.align_dates || args.common.align_dates)?;
    Ok(json!({ "results": returns }))
}
