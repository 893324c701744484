//! Field values and the small amount of value logic the store needs.
//!
//! Documents are flat JSON maps. Dotted field paths (`"address.city"`)
//! address nested maps. Cross-type ordering follows the store's rule:
//! null < boolean < number < string < array < map.

use std::cmp::Ordering;

use serde::Serialize;
pub use serde_json::Value;

use crate::error::StoreError;

/// Field-name to value mapping for one document.
pub type Fields = serde_json::Map<String, Value>;

const SENTINEL_KEY: &str = "__docbind_sentinel";
const SERVER_TIMESTAMP: &str = "server_timestamp";

/// Placeholder replaced by the store's commit timestamp when written.
pub fn server_timestamp() -> Value {
    let mut marker = Fields::new();
    marker.insert(SENTINEL_KEY.to_string(), Value::from(SERVER_TIMESTAMP));
    Value::Object(marker)
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value.as_object().is_some_and(is_server_timestamp_map)
}

fn is_server_timestamp_map(map: &Fields) -> bool {
    map.len() == 1 && map.get(SENTINEL_KEY).and_then(Value::as_str) == Some(SERVER_TIMESTAMP)
}

/// Converts any serializable map-shaped value into document fields.
pub fn into_fields(data: impl Serialize) -> Result<Fields, StoreError> {
    match serde_json::to_value(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::invalid_argument(format!(
            "document data must be a map, got {}",
            kind(&other)
        ))),
        Err(e) => Err(StoreError::invalid_argument(format!(
            "document data is not serializable: {}",
            e
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Looks up a possibly dotted field path.
pub fn field<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Writes `value` at a dotted field path, creating intermediate maps.
pub(crate) fn set_field(fields: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Fields::new()));
            if !slot.is_object() {
                *slot = Value::Object(Fields::new());
            }
            if let Value::Object(child) = slot {
                set_field(child, rest, value);
            }
        }
    }
}

/// Deep-merges `source` into `target`; nested maps merge, everything else replaces.
pub(crate) fn merge_fields(target: &mut Fields, source: Fields) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming))
                if !is_server_timestamp_map(&incoming) =>
            {
                merge_fields(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Replaces every server-timestamp placeholder with `timestamp`.
pub(crate) fn resolve_server_timestamps(fields: &mut Fields, timestamp: &str) {
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::from(timestamp);
        } else if let Value::Object(child) = value {
            resolve_server_timestamps(child, timestamp);
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub(crate) fn same_type(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// Total order over field values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    same_type(a, b) && compare_values(a, b) == Ordering::Equal
}
