pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Per-asset records at the top of an envelope: an array `result` (stats)
/// or a bare `results` list (returns).
pub(crate) fn top_level_records(map: &Map<String, Value>) -> Option<&[Value]> {
    match (map.get("result"), map.get("results")) {
        (Some(Value::Array(records)), _) | (None, Some(Value::Array(records))) => Some(records.as_slice()),
        _ => None,
    }
}

/// Flatten one result object into ordered (column, cell) pairs.
///
/// Portfolios (`{tickers, weights}`) become `weight_<ticker>` columns, Sharpe
/// ratios collapse to their value, and other nested objects use dotted keys.
pub(crate) fn flatten_row(map: &Map<String, Value>) -> Vec<(String, String)> {
    let mut row = Vec::new();
    flatten_into("", map, &mut row);
    row
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, row: &mut Vec<(String, String)>) {
    for (key, val) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(weights) = portfolio_weights(val) {
            for (ticker, w) in weights {
                row.push((format!("weight_{ticker}"), w));
            }
            continue;
        }
        match val {
            Value::Object(inner) if sharpe_value(val).is_none() => flatten_into(&name, inner, row),
            _ => row.push((name, format_cell(val))),
        }
    }
}

/// `(ticker, weight)` pairs when the value is a serialized portfolio.
pub(crate) fn portfolio_weights(value: &Value) -> Option<Vec<(String, String)>> {
    let map = value.as_object()?;
    if map.len() != 2 {
        return None;
    }
    let tickers = map.get("tickers")?.as_array()?;
    let weights = map.get("weights")?.as_array()?;
    Some(
        tickers
            .iter()
            .zip(weights)
            .map(|(t, w)| (format_cell(t), format_cell(w)))
            .collect(),
    )
}

/// Sharpe ratios serialize as `{"defined": x}` or `"undefined"`.
fn sharpe_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get("defined").map(format_cell),
        _ => None,
    }
}

/// Render a single cell; long numeric arrays are summarized by length.
pub(crate) fn format_cell(value: &Value) -> String {
    if let Some(s) = sharpe_value(value) {
        return s;
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(arr) if arr.len() > 12 => format!("<{} values>", arr.len()),
        Value::Array(arr) => arr.iter().map(format_cell).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
