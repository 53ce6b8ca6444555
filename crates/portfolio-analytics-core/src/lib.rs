pub mod cancel;
pub mod config;
pub mod covariance;
pub mod error;
pub mod returns;
pub mod types;

#[cfg(feature = "optimization")]
pub mod optimization;

#[cfg(feature = "simulation")]
pub mod simulation;

#[cfg(feature = "workflows")]
pub mod workflows;

pub use cancel::CancellationToken;
pub use config::{AnalyticsConfig, PortfolioConstraints, SimulationConfig, WeightBounds};
pub use error::AnalyticsError;
pub use types::*;

/// Standard result type for all portfolio-analytics operations
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
