use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::config::AnalyticsConfig;
use crate::covariance::{build_model, CovarianceModel};
use crate::error::AnalyticsError;
use crate::optimization::{compute_frontier, EfficientFrontier};
use crate::returns::{compute_returns, compute_statistics_batch, intersect_dates, AssetStatistics};
use crate::simulation::{simulate, SimulationResult, SimulationTarget};
use crate::types::{with_metadata, ComputationOutput, Portfolio, PriceSeries, ReturnMethod, ReturnSeries};
use crate::AnalyticsResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which portfolio to push through the bootstrap simulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationChoice {
    MaxSharpe,
    MinRisk,
    /// Weights in the order of `prices`.
    Custom { weights: Vec<f64> },
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAnalysisInput {
    pub prices: Vec<PriceSeries>,
    pub config: AnalyticsConfig,
    #[serde(default)]
    pub return_method: ReturnMethod,
    /// Restrict all series to their common dates first.
    #[serde(default)]
    pub align_dates: bool,
    #[serde(default)]
    pub simulate: SimulationChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAnalysisOutput {
    pub statistics: Vec<AssetStatistics>,
    pub model: CovarianceModel,
    pub frontier: EfficientFrontier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_portfolio: Option<Portfolio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationResult>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Prices -> returns -> {statistics, covariance model -> frontier} ->
/// bootstrap of the selected portfolio.
///
/// Statistics and the frontier run concurrently. Warnings from every stage
/// are collected into the returned envelope, prefixed with the stage name.
pub fn run_portfolio_analysis(
    input: &PortfolioAnalysisInput,
    cancel: &CancellationToken,
) -> AnalyticsResult<ComputationOutput<PortfolioAnalysisOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let cfg = &input.config;
    validate_input(input)?;
    let sim_config = match input.simulate {
        SimulationChoice::None => None,
        _ => Some(cfg.simulation_config()?),
    };

    let _span = tracing::info_span!("portfolio_analysis", tickers = input.prices.len()).entered();

    // --- Returns ---
    let prices = if input.align_dates {
        intersect_dates(&input.prices)?
    } else {
        input.prices.clone()
    };
    let returns: Vec<ReturnSeries> = prices
        .iter()
        .map(|p| compute_returns(p, input.return_method))
        .collect::<AnalyticsResult<_>>()?;
    let model = build_model(&returns, cfg.periods_per_year)?;
    tracing::info!(
        tickers = model.n_assets(),
        observations = model.observations().unwrap_or(0),
        "covariance model built"
    );

    // --- Statistics and frontier ---
    let constraints = cfg.frontier_constraints();
    let (stats, frontier) = rayon::join(
        || compute_statistics_batch(&returns, cfg.risk_free_rate, cfg.periods_per_year, cancel),
        || compute_frontier(&model, &constraints, cfg.risk_free_rate, cancel),
    );
    let stats = stats?;
    let frontier = frontier?;

    let mut statistics = Vec::with_capacity(stats.len());
    for s in stats {
        warnings.extend(s.warnings.into_iter().map(|w| format!("statistics: {w}")));
        statistics.push(s.result);
    }
    warnings.extend(frontier.warnings.into_iter().map(|w| format!("frontier: {w}")));
    let frontier = frontier.result;

    // --- Simulation ---
    let selected = match input.simulate {
        SimulationChoice::None => None,
        SimulationChoice::MaxSharpe => Some(frontier.max_sharpe.portfolio.clone()),
        SimulationChoice::MinRisk => Some(frontier.min_risk.portfolio.clone()),
        SimulationChoice::Custom { ref weights } => {
            Some(Portfolio::new(model.tickers().to_vec(), weights.clone())?)
        }
    };

    let simulation = match (&selected, &sim_config) {
        (Some(portfolio), Some(sim_cfg)) => {
            let out = simulate(
                SimulationTarget::Portfolio {
                    series: &returns,
                    portfolio,
                },
                sim_cfg,
                cancel,
            )?;
            warnings.extend(out.warnings.into_iter().map(|w| format!("simulation: {w}")));
            Some(out.result)
        }
        _ => None,
    };

    let output = PortfolioAnalysisOutput {
        statistics,
        model,
        frontier,
        simulated_portfolio: selected,
        simulation,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Portfolio Analysis (returns, statistics, mean-variance frontier, bootstrap)",
        &serde_json::json!({
            "tickers": input.prices.iter().map(|p| p.ticker()).collect::<Vec<_>>(),
            "return_method": input.return_method,
            "align_dates": input.align_dates,
            "simulate": input.simulate,
            "config": cfg,
        }),
        warnings,
        elapsed,
        output,
    ))
}

fn validate_input(input: &PortfolioAnalysisInput) -> AnalyticsResult<()> {
    input.config.validate()?;
    if input.prices.is_empty() {
        return Err(AnalyticsError::insufficient_data("portfolio analysis", 1, 0));
    }
    if let SimulationChoice::Custom { ref weights } = input.simulate {
        if weights.len() != input.prices.len() {
            return Err(AnalyticsError::invalid_input(
                "simulate.weights",
                format!("Expected {} weights but got {}", input.prices.len(), weights.len()),
            ));
        }
    }
    Ok(())
}
