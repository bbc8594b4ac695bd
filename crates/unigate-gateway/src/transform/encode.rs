//! Structural payload compression
//!
//! Lossless re-encoding of JSON-shaped payloads: arrays of objects that
//! share one key set collapse into a tabular form,
//!
//! ```json
//! {"~cols": ["a", "b"], "~rows": [[1, 2], [3, 4]]}
//! ```
//!
//! which drops the repeated keys from every row. The encoding is reversible
//! by [`expand`]; clients run the inverse to recover the original payload
//! byte-for-byte. `compact` is applied only when it actually shrinks the
//! serialized payload, and refuses inputs that could collide with the
//! tabular marker keys.

use anyhow::{bail, Result};
use serde_json::{Map, Value};

const COLS_KEY: &str = "~cols";
const ROWS_KEY: &str = "~rows";

/// Compact a payload. Returns the original shape unchanged when compaction
/// would not reduce the serialized size.
pub fn compact(payload: &Value) -> Result<Value> {
    if contains_marker_shape(payload) {
        // Encoding would be ambiguous to decode; let the caller pass the
        // payload through untouched.
        bail!("payload already contains tabular marker keys");
    }

    let compacted = compact_value(payload);
    let original_len = serde_json::to_string(payload)?.len();
    let compacted_len = serde_json::to_string(&compacted)?.len();
    if compacted_len < original_len {
        Ok(compacted)
    } else {
        Ok(payload.clone())
    }
}

/// Client-side inverse of [`compact`].
pub fn expand(payload: &Value) -> Value {
    match payload {
        Value::Object(fields) => {
            if let Some(rows) = decode_table(fields) {
                return rows;
            }
            Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), expand(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(expand).collect()),
        other => other.clone(),
    }
}

fn compact_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let compacted: Vec<Value> = items.iter().map(compact_value).collect();
            match encode_table(&compacted) {
                Some(table) => table,
                None => Value::Array(compacted),
            }
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), compact_value(item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Collapse a uniform object array into tabular form. Requires at least two
/// rows (a single object gains nothing) and an identical key sequence in
/// every row.
fn encode_table(items: &[Value]) -> Option<Value> {
    if items.len() < 2 {
        return None;
    }
    let first = items.first()?.as_object()?;
    if first.is_empty() {
        return None;
    }
    let cols: Vec<&String> = first.keys().collect();

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let object = item.as_object()?;
        if object.len() != cols.len() || !cols.iter().all(|c| object.contains_key(*c)) {
            return None;
        }
        rows.push(Value::Array(
            cols.iter().map(|c| object[*c].clone()).collect(),
        ));
    }

    let mut table = Map::new();
    table.insert(
        COLS_KEY.to_string(),
        Value::Array(cols.into_iter().map(|c| Value::String(c.clone())).collect()),
    );
    table.insert(ROWS_KEY.to_string(), Value::Array(rows));
    Some(Value::Object(table))
}

fn decode_table(fields: &Map<String, Value>) -> Option<Value> {
    if fields.len() != 2 {
        return None;
    }
    let cols = fields.get(COLS_KEY)?.as_array()?;
    let rows = fields.get(ROWS_KEY)?.as_array()?;

    let keys: Vec<&str> = cols.iter().map(|c| c.as_str()).collect::<Option<_>>()?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row.as_array()?;
        if cells.len() != keys.len() {
            return None;
        }
        let object: Map<String, Value> = keys
            .iter()
            .zip(cells.iter())
            .map(|(key, cell)| (key.to_string(), expand(cell)))
            .collect();
        items.push(Value::Object(object));
    }
    Some(Value::Array(items))
}

/// True when any object in the tree already uses the marker key pair, which
/// would make a decode of the encoded form ambiguous.
fn contains_marker_shape(value: &Value) -> bool {
    match value {
        Value::Object(fields) => {
            (fields.contains_key(COLS_KEY) && fields.contains_key(ROWS_KEY))
                || fields.values().any(contains_marker_shape)
        }
        Value::Array(items) => items.iter().any(contains_marker_shape),
        _ => false,
    }
}
