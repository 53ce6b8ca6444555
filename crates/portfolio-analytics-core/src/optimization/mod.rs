pub mod constraints;
pub mod frontier;
mod linalg;
pub mod solver;

/// Weights smaller in magnitude than this are reported as exactly zero.
pub const WEIGHT_CLAMP: f64 = 1e-6;

pub use constraints::{clean_weights, resolve_bounds, ResolvedBounds};
pub use frontier::{
    compute_frontier, compute_frontier_with_solver, portfolio_performance, EfficientFrontier, FrontierPoint,
    PortfolioPerformance,
};
pub use solver::{ActiveSetSolver, ClosedFormSolver, QpProblem, QpSolver};
