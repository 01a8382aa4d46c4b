//! Row-oriented readers for CSV and JSON.
//!
//! Each row or array element becomes one self-describing text record
//! (`header: value` lines) so that rows embed independently.

use lore_core::{LoreError, Result};
use serde_json::Value;

/// Render CSV rows as `header: value` records, skipping blank rows.
pub fn csv_rows(text: &str) -> Result<Vec<String>> {
    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LoreError::extraction("csv", e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LoreError::extraction("csv", e.to_string()))?;
        let lines: Vec<String> = record
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(i, value)| match headers.get(i).filter(|h| !h.is_empty()) {
                Some(header) => format!("{}: {}", header, value.trim()),
                None => format!("column {}: {}", i + 1, value.trim()),
            })
            .collect();
        if !lines.is_empty() {
            rows.push(lines.join("\n"));
        }
    }
    Ok(rows)
}

fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or("");
    if first.matches('\t').count() > first.matches(',').count() {
        b'\t'
    } else {
        b','
    }
}

/// Render a JSON document as records: one per array element, or one for
/// a top-level object.
pub fn json_records(text: &str) -> Result<Vec<String>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| LoreError::extraction("json", e.to_string()))?;

    let records: Vec<String> = match value {
        Value::Array(items) => items.iter().map(render).collect(),
        other => vec![render(&other)],
    };
    Ok(records.into_iter().filter(|r| !r.trim().is_empty()).collect())
}

fn render(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten("", value, &mut lines);
    lines.join("\n")
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        Value::Array(items) if items.iter().all(is_scalar) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if !joined.is_empty() {
                push_line(prefix, &joined.join(", "), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, i), child, out);
            }
        }
        scalar => {
            if let Some(text) = scalar_text(scalar) {
                push_line(prefix, &text, out);
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn push_line(prefix: &str, text: &str, out: &mut Vec<String>) {
    if prefix.is_empty() {
        out.push(text.to_string());
    } else {
        out.push(format!("{}: {}", prefix, text));
    }
}
