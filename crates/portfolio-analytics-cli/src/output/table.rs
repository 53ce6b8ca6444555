use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{flatten_row, format_cell, portfolio_weights, top_level_records};

/// Format output as tables using the tabled crate.
///
/// Scalar fields of the result go into one Field/Value table; arrays of
/// records (frontier points, statistics, histogram bins) and nested sections
/// each get their own table.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(records) = top_level_records(map) {
                print_records(records);
            } else if let Some(result) = map.get("result") {
                print_section(None, result);
            } else {
                print_section(None, value);
            }
            print_envelope(map);
        }
        Value::Array(arr) => print_records(arr),
        _ => println!("{}", value),
    }
}

fn print_section(title: Option<&str>, value: &Value) {
    let Value::Object(map) = value else {
        println!("{}", format_cell(value));
        return;
    };
    if let Some(t) = title {
        println!("\n{}:", t);
    }

    let mut scalars = Builder::default();
    scalars.push_record(["Field", "Value"]);
    let mut nested: Vec<(&str, &Value)> = Vec::new();
    for (key, val) in map {
        if let Some(weights) = portfolio_weights(val) {
            for (ticker, w) in weights {
                scalars.push_record([format!("weight {}", ticker), w]);
            }
        } else if is_section(val) {
            nested.push((key.as_str(), val));
        } else {
            scalars.push_record([key.clone(), format_cell(val)]);
        }
    }
    println!("{}", Table::from(scalars));

    for (key, val) in nested {
        match val {
            Value::Array(records) => {
                println!("\n{}:", key);
                print_records(records);
            }
            _ => print_section(Some(key), val),
        }
    }
}

/// Arrays of objects and multi-field objects (other than Sharpe ratios and
/// portfolios) are rendered as their own tables.
fn is_section(value: &Value) -> bool {
    match value {
        Value::Array(arr) => matches!(arr.first(), Some(Value::Object(_))),
        Value::Object(map) => map.len() > 1 || !map.contains_key("defined"),
        _ => false,
    }
}

fn print_records(records: &[Value]) {
    if records.is_empty() {
        println!("(empty)");
        return;
    }

    let rows: Vec<Vec<(String, String)>> = records
        .iter()
        .filter_map(Value::as_object)
        .map(flatten_row)
        .collect();
    let Some(first) = rows.first() else {
        for item in records {
            println!("{}", format_cell(item));
        }
        return;
    };

    let headers: Vec<String> = first.iter().map(|(c, _)| c.clone()).collect();
    let mut builder = Builder::default();
    builder.push_record(headers.clone());
    for row in &rows {
        builder.push_record(headers.iter().map(|h| {
            row.iter()
                .find(|(c, _)| c == h)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        }));
    }
    println!("{}", Table::from(builder));
}

fn print_envelope(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}
