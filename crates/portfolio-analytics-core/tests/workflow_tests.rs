#![cfg(feature = "workflows")]

use portfolio_analytics_core::workflows::{run_portfolio_analysis, PortfolioAnalysisInput, SimulationChoice};
use portfolio_analytics_core::CancellationToken;

const INPUT: &str = r#"{
    "prices": [
        {"ticker": "AAA", "points": [
            {"date": "2024-01-02", "price": 100.0},
            {"date": "2024-01-03", "price": 101.0},
            {"date": "2024-01-04", "price": 100.5},
            {"date": "2024-01-05", "price": 102.0},
            {"date": "2024-01-08", "price": 101.2},
            {"date": "2024-01-09", "price": 103.1}
        ]},
        {"ticker": "BBB", "points": [
            {"date": "2024-01-02", "price": 50.0},
            {"date": "2024-01-03", "price": 49.5},
            {"date": "2024-01-04", "price": 50.8},
            {"date": "2024-01-05", "price": 51.0},
            {"date": "2024-01-08", "price": 52.4},
            {"date": "2024-01-09", "price": 51.9}
        ]}
    ],
    "config": {
        "risk_free_rate": 0.04,
        "periods_per_year": 252,
        "num_frontier_points": 5,
        "num_simulation_paths": 50,
        "horizon_periods": 10,
        "random_seed": 17,
        "min_observations": 5
    },
    "simulate": {"type": "custom", "weights": [0.5, 0.5]}
}"#;

#[test]
fn test_analysis_from_json() {
    let input: PortfolioAnalysisInput = serde_json::from_str(INPUT).unwrap();
    assert_eq!(input.simulate, SimulationChoice::Custom { weights: vec![0.5, 0.5] });

    let out = run_portfolio_analysis(&input, &CancellationToken::new()).unwrap();
    let r = &out.result;
    assert_eq!(r.statistics.len(), 2);
    assert_eq!(r.model.observations(), Some(5));
    assert_eq!(r.frontier.points.len(), 5);
    let sim = r.simulation.as_ref().unwrap();
    assert_eq!(sim.seed, 17);
    assert_eq!(sim.terminal_values.len(), 50);
    // Only five observations: statistics warn about small samples.
    assert!(out.warnings.iter().any(|w| w.starts_with("statistics:")));
}

#[test]
fn test_missing_required_config_rejected() {
    let json = r#"{"prices": [], "config": {"periods_per_year": 252}}"#;
    assert!(serde_json::from_str::<PortfolioAnalysisInput>(json).is_err());
}
