pub mod series;
pub mod statistics;

pub use series::{compute_returns, intersect_dates};
pub use statistics::{compute_statistics, compute_statistics_batch, AssetStatistics, NormalFit, NormalityTest};
