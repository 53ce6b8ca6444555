pub mod bootstrap;

pub use bootstrap::{simulate, HistogramBin, SimPercentiles, SimulationResult, SimulationTarget};
