mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::analyze::AnalyzeArgs;
use commands::frontier::FrontierArgs;
use commands::returns::ReturnsArgs;
use commands::simulate::SimulateArgs;
use commands::stats::{ModelArgs, StatsArgs};

/// Return statistics, efficient frontiers and bootstrap simulation
#[derive(Parser)]
#[command(
    name = "pfa",
    version,
    about = "Return statistics, efficient frontiers and bootstrap simulation",
    long_about = "A CLI for portfolio analytics over historical price series. Computes \
                  per-asset return statistics, annualized covariance models, \
                  Markowitz efficient frontiers with max-Sharpe and min-risk \
                  portfolios, and historical bootstrap simulations. Input is JSON \
                  or YAML from --input or stdin."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log progress to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert price series to periodic returns
    Returns(ReturnsArgs),
    /// Per-asset return statistics (annualized return, volatility, Sharpe, moments)
    Stats(StatsArgs),
    /// Annualized mean returns and covariance matrix
    Model(ModelArgs),
    /// Efficient frontier with max-Sharpe and min-risk portfolios
    Frontier(FrontierArgs),
    /// Historical bootstrap simulation of an asset or portfolio
    Simulate(SimulateArgs),
    /// Full pipeline: statistics, frontier and simulation
    Analyze(AnalyzeArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Returns(args) => commands::returns::run_returns(args),
        Commands::Stats(args) => commands::stats::run_stats(args),
        Commands::Model(args) => commands::stats::run_model(args),
        Commands::Frontier(args) => commands::frontier::run_frontier(args),
        Commands::Simulate(args) => commands::simulate::run_simulate(args),
        Commands::Analyze(args) => commands::analyze::run_analyze(args),
        Commands::Version => {
            println!("pfa {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
