use clap::Args;
use serde_json::Value;

use portfolio_analytics_core::workflows::{run_portfolio_analysis, PortfolioAnalysisInput};
use portfolio_analytics_core::{CancellationToken, ReturnMethod};

use super::{load_input, InputArgs};

/// Arguments for the end-to-end analysis pipeline
#[derive(Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub common: InputArgs,
}

pub fn run_analyze(args: AnalyzeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut analysis: PortfolioAnalysisInput = load_input(&args.common.input, "portfolio analysis")?;
    if let Some(method) = args.common.method {
        analysis.return_method = ReturnMethod::from(method);
    }
    analysis.align_dates |= args.common.align_dates;

    let result = run_portfolio_analysis(&analysis, &CancellationToken::new())?;
    Ok(serde_json::to_value(result)?)
}
