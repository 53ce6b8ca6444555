pub mod portfolio_analysis;

pub use portfolio_analysis::{
    run_portfolio_analysis, PortfolioAnalysisInput, PortfolioAnalysisOutput, SimulationChoice,
};
