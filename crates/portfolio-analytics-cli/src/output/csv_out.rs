use serde_json::{Map, Value};
use std::io;

use super::{flatten_row, format_cell, top_level_records};

type StdoutWriter<'a> = csv::Writer<io::StdoutLock<'a>>;

/// Record arrays that make a natural CSV body, in order of preference.
const RECORD_KEYS: [&str; 4] = ["points", "statistics", "histogram", "results"];

/// Write output as CSV to stdout.
///
/// Record-shaped results (frontier points, per-asset statistics, histogram
/// bins) are written one row per record with portfolio weights spread over
/// `weight_<ticker>` columns; anything else becomes field/value pairs.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        Value::Object(map) => {
            let body = map.get("result").and_then(Value::as_object).unwrap_or(map);
            match top_level_records(map).or_else(|| find_records(body)) {
                Some(records) => write_records(&mut wtr, records),
                None => write_fields(&mut wtr, body),
            }
        }
        Value::Array(arr) => write_records(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([format_cell(value)]);
        }
    }

    let _ = wtr.flush();
}

fn find_records(map: &Map<String, Value>) -> Option<&[Value]> {
    RECORD_KEYS.iter().find_map(|key| match map.get(*key) {
        Some(Value::Array(arr)) if matches!(arr.first(), Some(Value::Object(_))) => {
            Some(arr.as_slice())
        }
        _ => None,
    })
}

fn write_fields(wtr: &mut StdoutWriter<'_>, map: &Map<String, Value>) {
    let _ = wtr.write_record(["field", "value"]);
    for (field, cell) in flatten_row(map) {
        let _ = wtr.write_record([field, cell]);
    }
}

fn write_records(wtr: &mut StdoutWriter<'_>, records: &[Value]) {
    let rows: Vec<Vec<(String, String)>> = records
        .iter()
        .filter_map(Value::as_object)
        .map(flatten_row)
        .collect();
    let Some(first) = rows.first() else {
        for item in records {
            let _ = wtr.write_record([format_cell(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first.iter().map(|(c, _)| c.as_str()).collect();
    let _ = wtr.write_record(&headers);
    for row in &rows {
        let cells: Vec<&str> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(c, _)| c.as_str() == *h)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or_default()
            })
            .collect();
        let _ = wtr.write_record(&cells);
    }
}
