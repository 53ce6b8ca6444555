#![cfg(feature = "optimization")]

use portfolio_analytics_core::covariance::CovarianceModel;
use portfolio_analytics_core::optimization::{
    compute_frontier, compute_frontier_with_solver, ActiveSetSolver, ClosedFormSolver,
};
use portfolio_analytics_core::{
    AnalyticsError, CancellationToken, PortfolioConstraints, SharpeRatio, WeightBounds,
};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn model(mu: &[f64], vols: &[f64], corr: &[Vec<f64>]) -> CovarianceModel {
    let n = mu.len();
    let cov = (0..n)
        .map(|i| (0..n).map(|j| corr[i][j] * vols[i] * vols[j]).collect())
        .collect();
    let tickers = (0..n).map(|i| format!("T{i}")).collect();
    CovarianceModel::from_parts(tickers, mu.to_vec(), cov).unwrap()
}

fn two_asset() -> CovarianceModel {
    model(
        &[0.10, 0.15],
        &[0.15, 0.25],
        &[vec![1.0, 0.3], vec![0.3, 1.0]],
    )
}

fn three_asset() -> CovarianceModel {
    model(
        &[0.07, 0.11, 0.16],
        &[0.12, 0.20, 0.30],
        &[
            vec![1.0, 0.2, -0.1],
            vec![0.2, 1.0, 0.4],
            vec![-0.1, 0.4, 1.0],
        ],
    )
}

/// Long-only weights on a simplex grid with the given step count.
fn simplex_grid(steps: usize) -> Vec<[f64; 3]> {
    let mut grid = Vec::new();
    for i in 0..=steps {
        for j in 0..=(steps - i) {
            let a = i as f64 / steps as f64;
            let b = j as f64 / steps as f64;
            grid.push([a, b, 1.0 - a - b]);
        }
    }
    grid
}

// ---------------------------------------------------------------------------
// Two-asset reference scenario
// ---------------------------------------------------------------------------

#[test]
fn test_two_asset_scenario() {
    let out = compute_frontier(
        &two_asset(),
        &PortfolioConstraints::long_only(20),
        0.03,
        &CancellationToken::new(),
    )
    .unwrap();
    let f = out.result;

    assert_eq!(f.points.len(), 20);
    assert!((f.points[0].expected_return - 0.10).abs() < 1e-9);
    assert!((f.points[19].expected_return - 0.15).abs() < 1e-9);

    let best = f.max_sharpe.sharpe_ratio.value("max_sharpe").unwrap();
    assert!(best >= 0.07 / 0.15 - 1e-12);
    assert!(best >= 0.12 / 0.25 - 1e-12);
    for p in &f.points {
        assert!(p.sharpe_ratio.as_option().unwrap_or(f64::NEG_INFINITY) <= best + 1e-9);
    }
    assert!(out.warnings.is_empty());
}

// ---------------------------------------------------------------------------
// Optimality against brute force
// ---------------------------------------------------------------------------

#[test]
fn test_frontier_beats_grid_search() {
    let m = three_asset();
    let out = compute_frontier(
        &m,
        &PortfolioConstraints::long_only(12),
        0.02,
        &CancellationToken::new(),
    )
    .unwrap();
    let grid = simplex_grid(60);

    for p in &out.result.points {
        for w in &grid {
            let r = m.portfolio_return(w);
            let vol = m.portfolio_volatility(w);
            let dominates = if p.is_efficient {
                r >= p.expected_return - 1e-12
            } else {
                r <= p.expected_return + 1e-12
            };
            if dominates {
                assert!(
                    vol >= p.volatility - 1e-7,
                    "grid portfolio {w:?} (r={r}, vol={vol}) beats frontier point (r={}, vol={})",
                    p.expected_return,
                    p.volatility
                );
            }
        }
    }

    let best = out.result.max_sharpe.sharpe_ratio.value("max_sharpe").unwrap();
    for w in &grid {
        let vol = m.portfolio_volatility(w);
        let sharpe = (m.portfolio_return(w) - 0.02) / vol;
        assert!(sharpe <= best + 1e-7);
    }
}

#[test]
fn test_weights_sum_to_one_and_respect_bounds() {
    let constraints = PortfolioConstraints {
        weight_bounds: Some(WeightBounds::PerAsset {
            min: vec![0.1, 0.0, 0.05],
            max: vec![0.6, 0.5, 0.4],
        }),
        ..PortfolioConstraints::long_only(10)
    };
    let out = compute_frontier(&three_asset(), &constraints, 0.02, &CancellationToken::new()).unwrap();
    let f = out.result;

    let all = f
        .points
        .iter()
        .map(|p| &p.portfolio)
        .chain([&f.min_risk.portfolio, &f.max_sharpe.portfolio]);
    for portfolio in all {
        assert!((portfolio.weight_sum() - 1.0).abs() < 1e-6);
        for (i, w) in portfolio.weights.iter().enumerate() {
            let (lo, hi) = ([0.1, 0.0, 0.05][i], [0.6, 0.5, 0.4][i]);
            assert!(*w >= lo - 1e-9 && *w <= hi + 1e-9, "weight {w} outside [{lo}, {hi}]");
        }
    }
    // Achievable range: fill the best assets after the minimums.
    assert!((f.return_range.1 - (0.1 * 0.07 + 0.5 * 0.11 + 0.4 * 0.16)).abs() < 1e-12);
}

#[test]
fn test_capped_weights_stay_within_cap() {
    // Two attractive low-correlation assets both pinned at the cap.
    let m = model(
        &[0.12, 0.11, 0.04, 0.06],
        &[0.15, 0.16, 0.30, 0.20],
        &[
            vec![1.0, 0.1, 0.5, 0.3],
            vec![0.1, 1.0, 0.5, 0.3],
            vec![0.5, 0.5, 1.0, 0.6],
            vec![0.3, 0.3, 0.6, 1.0],
        ],
    );
    let constraints = PortfolioConstraints {
        weight_bounds: Some(WeightBounds::Global { min: 0.0, max: 0.4 }),
        ..PortfolioConstraints::long_only(25)
    };
    let f = compute_frontier(&m, &constraints, 0.02, &CancellationToken::new())
        .unwrap()
        .result;

    let all = f
        .points
        .iter()
        .map(|p| &p.portfolio)
        .chain([&f.min_risk.portfolio, &f.max_sharpe.portfolio]);
    for portfolio in all {
        assert!((portfolio.weight_sum() - 1.0).abs() < 1e-9);
        for w in &portfolio.weights {
            assert!(*w >= 0.0 && *w <= 0.4 + 1e-9, "weight {w} above cap in {:?}", portfolio.weights);
        }
    }
}

// ---------------------------------------------------------------------------
// Solver interchangeability and error paths
// ---------------------------------------------------------------------------

#[test]
fn test_solvers_agree_when_shorting() {
    let m = three_asset();
    let c = PortfolioConstraints {
        allow_short: true,
        ..PortfolioConstraints::long_only(6)
    };
    let cancel = CancellationToken::new();
    let closed = compute_frontier_with_solver(&m, &c, 0.02, &ClosedFormSolver, &cancel).unwrap();
    let active = compute_frontier_with_solver(&m, &c, 0.02, &ActiveSetSolver::default(), &cancel).unwrap();

    assert_eq!(closed.result.points.len(), active.result.points.len());
    for (a, b) in closed.result.points.iter().zip(active.result.points.iter()) {
        assert!((a.volatility - b.volatility).abs() < 1e-8);
    }
    assert!((closed.result.min_risk.volatility - active.result.min_risk.volatility).abs() < 1e-10);
}

#[test]
fn test_singular_matrix_with_long_only_bounds_is_solvable() {
    // Two perfectly correlated assets with the same volatility.
    let m = model(
        &[0.05, 0.08, 0.12],
        &[0.2, 0.2, 0.3],
        &[vec![1.0, 1.0, 0.0], vec![1.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
    );
    let out = compute_frontier(&m, &PortfolioConstraints::long_only(5), 0.02, &CancellationToken::new()).unwrap();
    assert_eq!(out.result.points.len(), 5);
    for p in &out.result.points {
        assert!((p.portfolio.weight_sum() - 1.0).abs() < 1e-6);
    }
}

#[test]
fn test_singular_matrix_unbounded_errors() {
    let m = model(
        &[0.05, 0.08],
        &[0.2, 0.2],
        &[vec![1.0, 1.0], vec![1.0, 1.0]],
    );
    let c = PortfolioConstraints {
        allow_short: true,
        ..Default::default()
    };
    assert!(matches!(
        compute_frontier(&m, &c, 0.02, &CancellationToken::new()),
        Err(AnalyticsError::SingularCovariance(_))
    ));
}

#[test]
fn test_impossible_bounds() {
    let c = PortfolioConstraints {
        weight_bounds: Some(WeightBounds::Global { min: 0.0, max: 0.3 }),
        ..Default::default()
    };
    assert!(matches!(
        compute_frontier(&three_asset(), &c, 0.02, &CancellationToken::new()),
        Err(AnalyticsError::InfeasibleConstraints(_))
    ));
}

#[test]
fn test_zero_volatility_asset_sharpe_undefined() {
    let m = CovarianceModel::from_parts(
        vec!["CASH".into()],
        vec![0.03],
        vec![vec![0.0]],
    )
    .unwrap();
    let out = compute_frontier(&m, &PortfolioConstraints::long_only(5), 0.03, &CancellationToken::new()).unwrap();
    assert_eq!(out.result.points.len(), 1);
    assert_eq!(out.result.max_sharpe.sharpe_ratio, SharpeRatio::Undefined);
    assert!(!out.warnings.is_empty());
}
