use clap::{Args, ValueEnum};
use serde::Deserialize;
use serde_json::Value;

use portfolio_analytics_core::covariance::{build_model, CovarianceModel};
use portfolio_analytics_core::optimization::{
    compute_frontier, compute_frontier_with_solver, ActiveSetSolver, ClosedFormSolver, QpSolver,
};
use portfolio_analytics_core::{AnalyticsConfig, CancellationToken};

use super::load_input;
use super::stats::load_returns;
use super::InputArgs;

/// Arguments for efficient frontier construction
#[derive(Args)]
pub struct FrontierArgs {
    #[command(flatten)]
    pub common: InputArgs,

    /// Read a precomputed covariance model (`{model, config}`) instead of prices
    #[arg(long, conflicts_with = "input")]
    pub model: Option<String>,

    /// Force a solver instead of choosing from the constraint set
    #[arg(long, value_enum)]
    pub solver: Option<SolverArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SolverArg {
    ActiveSet,
    ClosedForm,
}

/// Annualized model supplied directly, e.g. for scenario analysis.
#[derive(Debug, Deserialize)]
struct ModelDocument {
    model: CovarianceModel,
    config: AnalyticsConfig,
}

pub fn run_frontier(args: FrontierArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let (model, config) = if args.model.is_some() {
        let doc: ModelDocument = load_input(&args.model, "frontier")?;
        doc.config.validate()?;
        (doc.model, doc.config)
    } else {
        let (doc, returns) = load_returns(&args.common, "frontier")?;
        let model = build_model(&returns, doc.config.periods_per_year)?;
        (model, doc.config)
    };

    let constraints = config.frontier_constraints();
    let cancel = CancellationToken::new();
    let result = match args.solver {
        None => compute_frontier(&model, &constraints, config.risk_free_rate, &cancel)?,
        Some(choice) => {
            let solver: Box<dyn QpSolver> = match choice {
                SolverArg::ActiveSet => Box::new(ActiveSetSolver::default()),
                SolverArg::ClosedForm => Box::new(ClosedFormSolver),
            };
            compute_frontier_with_solver(
                &model,
                &constraints,
                config.risk_free_rate,
                solver.as_ref(),
                &cancel,
            )?
        }
    };
    Ok(serde_json::to_value(result)?)
}
