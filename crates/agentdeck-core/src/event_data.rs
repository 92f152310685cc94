// ABOUTME: Size limiting for event payloads before they are streamed or stored.
// ABOUTME: Long string fields are cut and a sibling `<field>_length` records the original size.

use serde_json::{Map, Value};

/// Maximum characters kept per string field in streamed frames.
pub const STREAM_FIELD_LIMIT: usize = 500;

/// Maximum characters kept per string field in persisted step records.
pub const STORED_FIELD_LIMIT: usize = 10_000;

/// Return a copy of `value` with every string longer than `max_chars`
/// truncated. Object fields also gain a `<field>_length` entry.
pub fn truncate_strings(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, field) in map {
                match field {
                    Value::String(s) if s.chars().count() > max_chars => {
                        out.insert(key.clone(), Value::String(cut(s, max_chars)));
                        out.insert(format!("{key}_length"), Value::from(s.chars().count()));
                    }
                    other => {
                        out.insert(key.clone(), truncate_strings(other, max_chars));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| truncate_strings(item, max_chars))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > max_chars => Value::String(cut(s, max_chars)),
        other => other.clone(),
    }
}

fn cut(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
