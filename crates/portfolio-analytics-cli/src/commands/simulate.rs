use clap::Args;
use serde_json::Value;

use portfolio_analytics_core::covariance::build_model;
use portfolio_analytics_core::optimization::compute_frontier;
use portfolio_analytics_core::simulation::{simulate, SimulationTarget};
use portfolio_analytics_core::workflows::SimulationChoice;
use portfolio_analytics_core::{CancellationToken, Portfolio};

use super::stats::load_returns;
use super::InputArgs;

/// Arguments for the historical bootstrap simulation
#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub common: InputArgs,

    /// Resample a single asset's history instead of the document's portfolio
    #[arg(long)]
    pub ticker: Option<String>,

    /// Override the configured random seed
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run_simulate(args: SimulateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let (mut doc, returns) = load_returns(&args.common, "simulation")?;
    if args.seed.is_some() {
        doc.config.random_seed = args.seed;
    }
    let sim_config = doc.config.simulation_config()?;
    let cancel = CancellationToken::new();

    if let Some(ref ticker) = args.ticker {
        let series = returns
            .iter()
            .find(|s| s.ticker() == ticker.as_str())
            .ok_or_else(|| format!("Ticker '{ticker}' not found in input"))?;
        let result = simulate(SimulationTarget::SingleAsset(series), &sim_config, &cancel)?;
        return Ok(serde_json::to_value(result)?);
    }

    let tickers: Vec<String> = returns.iter().map(|s| s.ticker().to_string()).collect();
    let portfolio = match doc.simulate {
        SimulationChoice::Custom { ref weights } => Portfolio::new(tickers, weights.clone())?,
        SimulationChoice::MaxSharpe | SimulationChoice::MinRisk => {
            let model = build_model(&returns, doc.config.periods_per_year)?;
            let frontier = compute_frontier(
                &model,
                &doc.config.frontier_constraints(),
                doc.config.risk_free_rate,
                &cancel,
            )?
            .result;
            if doc.simulate == SimulationChoice::MaxSharpe {
                frontier.max_sharpe.portfolio
            } else {
                frontier.min_risk.portfolio
            }
        }
        SimulationChoice::None => {
            return Err("Nothing to simulate: pass --ticker or set `simulate` in the input".into());
        }
    };
    tracing::info!(tickers = portfolio.tickers.len(), "simulating portfolio");

    let result = simulate(
        SimulationTarget::Portfolio {
            series: &returns,
            portfolio: &portfolio,
        },
        &sim_config,
        &cancel,
    )?;
    Ok(serde_json::to_value(result)?)
}
