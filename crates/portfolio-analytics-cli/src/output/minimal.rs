use serde_json::Value;

use super::{format_cell, portfolio_weights, top_level_records};

/// Print just the key answer from the output.
///
/// Frontiers (including the one inside a full analysis) print the max-Sharpe
/// weights; per-asset lists print one line per ticker; simulations print
/// their mean terminal value.
pub fn print_minimal(value: &Value) {
    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Some(records) = value.as_object().and_then(top_level_records) {
        for item in records {
            println!("{}", summarize_asset(item));
        }
        return;
    }

    let frontier = result.get("frontier").unwrap_or(result);
    if let Some(weights) = frontier
        .get("max_sharpe")
        .and_then(|p| p.get("portfolio"))
        .and_then(portfolio_weights)
    {
        let line: Vec<String> = weights.into_iter().map(|(t, w)| format!("{t}={w}")).collect();
        println!("{}", line.join(" "));
        return;
    }

    let priority_keys = ["mean", "sharpe_ratio", "expected_return", "volatility"];
    if let Value::Object(map) = result {
        for key in &priority_keys {
            if let Some(val) = map.get(*key).filter(|v| !v.is_null()) {
                println!("{}", format_cell(val));
                return;
            }
        }
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_cell(val));
            return;
        }
    }

    println!("{}", format_cell(result));
}

/// `TICKER: annualized_return` for statistics, `TICKER: n` for return series.
fn summarize_asset(item: &Value) -> String {
    let ticker = item.get("ticker").map(format_cell).unwrap_or_default();
    let answer = item
        .get("annualized_return")
        .map(format_cell)
        .or_else(|| {
            item.get("values")
                .and_then(Value::as_array)
                .map(|v| v.len().to_string())
        })
        .unwrap_or_default();
    format!("{ticker}: {answer}")
}
