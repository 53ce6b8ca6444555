use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;
use crate::types::Rate;
use crate::AnalyticsResult;

/// Bounds on individual portfolio weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightBounds {
    /// The same (min, max) for every asset.
    Global { min: f64, max: f64 },
    /// Positional per-asset bounds, matching the model's ticker order.
    PerAsset { min: Vec<f64>, max: Vec<f64> },
}

impl WeightBounds {
    fn validate(&self) -> AnalyticsResult<()> {
        let pairs: Vec<(f64, f64)> = match self {
            WeightBounds::Global { min, max } => vec![(*min, *max)],
            WeightBounds::PerAsset { min, max } => {
                if min.len() != max.len() {
                    return Err(AnalyticsError::invalid_input(
                        "weight_bounds",
                        format!(
                            "Per-asset min has {} entries but max has {}",
                            min.len(),
                            max.len()
                        ),
                    ));
                }
                min.iter().copied().zip(max.iter().copied()).collect()
            }
        };
        for (i, (lo, hi)) in pairs.into_iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(AnalyticsError::invalid_input(
                    format!("weight_bounds[{i}]"),
                    "Bounds must be finite; omit weight_bounds for unbounded weights",
                ));
            }
        }
        Ok(())
    }
}

/// Constraint set for frontier construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    /// Permit negative weights. Without explicit bounds this leaves weights
    /// unbounded and the optimizer uses the closed-form path.
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_bounds: Option<WeightBounds>,
    /// Number of target returns on the frontier (at least 2).
    #[serde(default = "default_frontier_points")]
    pub num_points: usize,
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            allow_short: false,
            weight_bounds: None,
            num_points: default_frontier_points(),
        }
    }
}

impl PortfolioConstraints {
    pub fn long_only(num_points: usize) -> Self {
        Self {
            num_points,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.num_points < 2 {
            return Err(AnalyticsError::invalid_input(
                "num_frontier_points",
                format!("At least 2 frontier points required, got {}", self.num_points),
            ));
        }
        if let Some(ref b) = self.weight_bounds {
            b.validate()?;
        }
        Ok(())
    }
}

/// Resampling configuration for the bootstrap simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub num_paths: usize,
    pub horizon_periods: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Minimum historical observations to resample from.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Retain every cumulative trajectory, not just terminal values.
    #[serde(default)]
    pub keep_paths: bool,
    /// Also histogram every simulated per-period return across all paths.
    #[serde(default)]
    pub period_histogram: bool,
    #[serde(default = "default_initial_value")]
    pub initial_value: f64,
}

impl SimulationConfig {
    pub fn new(num_paths: usize, horizon_periods: usize, seed: Option<u64>) -> Self {
        Self {
            num_paths,
            horizon_periods,
            seed,
            min_observations: default_min_observations(),
            keep_paths: false,
            period_histogram: false,
            initial_value: default_initial_value(),
        }
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.num_paths < 1 {
            return Err(AnalyticsError::invalid_input(
                "num_simulation_paths",
                "At least one simulation path required",
            ));
        }
        if self.horizon_periods < 1 {
            return Err(AnalyticsError::invalid_input(
                "horizon_periods",
                "Horizon must be at least one period",
            ));
        }
        if self.min_observations < 2 {
            return Err(AnalyticsError::invalid_input(
                "min_observations",
                "At least 2 observations must be required for resampling",
            ));
        }
        if !self.initial_value.is_finite() || self.initial_value <= 0.0 {
            return Err(AnalyticsError::invalid_input(
                "initial_value",
                "Initial value must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// Full configuration surface of the engine. `risk_free_rate` and
/// `periods_per_year` carry no defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Annual risk-free rate.
    pub risk_free_rate: Rate,
    /// Return observations per year (252 for daily data).
    pub periods_per_year: u32,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_bounds: Option<WeightBounds>,
    #[serde(default = "default_frontier_points")]
    pub num_frontier_points: usize,
    #[serde(default = "default_simulation_paths")]
    pub num_simulation_paths: usize,
    /// Required only by simulation.
    #[serde(default)]
    pub horizon_periods: Option<usize>,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    #[serde(default)]
    pub keep_paths: bool,
    #[serde(default)]
    pub period_histogram: bool,
    #[serde(default = "default_initial_value")]
    pub initial_value: f64,
}

fn default_frontier_points() -> usize {
    20
}

fn default_simulation_paths() -> usize {
    1_000
}

fn default_min_observations() -> usize {
    30
}

fn default_initial_value() -> f64 {
    1.0
}

impl AnalyticsConfig {
    pub fn new(risk_free_rate: Rate, periods_per_year: u32) -> Self {
        Self {
            risk_free_rate,
            periods_per_year,
            allow_short: false,
            weight_bounds: None,
            num_frontier_points: default_frontier_points(),
            num_simulation_paths: default_simulation_paths(),
            horizon_periods: None,
            random_seed: None,
            min_observations: default_min_observations(),
            keep_paths: false,
            period_histogram: false,
            initial_value: default_initial_value(),
        }
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(AnalyticsError::invalid_input(
                "risk_free_rate",
                "Risk-free rate must be finite",
            ));
        }
        if self.periods_per_year < 1 {
            return Err(AnalyticsError::invalid_input(
                "periods_per_year",
                "Periods per year must be at least 1",
            ));
        }
        self.frontier_constraints().validate()?;
        if self.num_simulation_paths < 1 {
            return Err(AnalyticsError::invalid_input(
                "num_simulation_paths",
                "At least one simulation path required",
            ));
        }
        if let Some(h) = self.horizon_periods {
            if h < 1 {
                return Err(AnalyticsError::invalid_input(
                    "horizon_periods",
                    "Horizon must be at least one period",
                ));
            }
        }
        if self.min_observations < 2 {
            return Err(AnalyticsError::invalid_input(
                "min_observations",
                "At least 2 observations must be required for resampling",
            ));
        }
        Ok(())
    }

    pub fn frontier_constraints(&self) -> PortfolioConstraints {
        PortfolioConstraints {
            allow_short: self.allow_short,
            weight_bounds: self.weight_bounds.clone(),
            num_points: self.num_frontier_points,
        }
    }

    pub fn simulation_config(&self) -> AnalyticsResult<SimulationConfig> {
        let horizon_periods = self.horizon_periods.ok_or_else(|| {
            AnalyticsError::invalid_input("horizon_periods", "Required for simulation")
        })?;
        let cfg = SimulationConfig {
            num_paths: self.num_simulation_paths,
            horizon_periods,
            seed: self.random_seed,
            min_observations: self.min_observations,
            keep_paths: self.keep_paths,
            period_histogram: self.period_histogram,
            initial_value: self.initial_value,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let cfg: AnalyticsConfig =
            serde_json::from_str(r#"{"risk_free_rate":0.04,"periods_per_year":252}"#).unwrap();
        assert!(!cfg.allow_short);
        assert_eq!(cfg.num_frontier_points, 20);
        assert_eq!(cfg.num_simulation_paths, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_requires_risk_free_rate() {
        let parsed: Result<AnalyticsConfig, _> =
            serde_json::from_str(r#"{"periods_per_year":252}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_config_rejects_single_frontier_point() {
        let mut cfg = AnalyticsConfig::new(0.04, 252);
        cfg.num_frontier_points = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_rejects_infinite_bounds() {
        let mut cfg = AnalyticsConfig::new(0.04, 252);
        cfg.weight_bounds = Some(WeightBounds::Global {
            min: f64::NEG_INFINITY,
            max: 1.0,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_simulation_config_requires_horizon() {
        let cfg = AnalyticsConfig::new(0.04, 252);
        assert!(cfg.simulation_config().is_err());
        let cfg = AnalyticsConfig {
            horizon_periods: Some(252),
            random_seed: Some(7),
            ..cfg
        };
        let sim = cfg.simulation_config().unwrap();
        assert_eq!(sim.horizon_periods, 252);
        assert_eq!(sim.seed, Some(7));
    }

    #[test]
    fn test_weight_bounds_tagged_json() {
        let b: WeightBounds =
            serde_json::from_str(r#"{"type":"global","min":0.0,"max":0.6}"#).unwrap();
        assert_eq!(b, WeightBounds::Global { min: 0.0, max: 0.6 });
    }
}
