pub mod estimator;

pub use estimator::{build_model, CovarianceModel};
