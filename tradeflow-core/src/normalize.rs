//! Text normalization for noisy pipeline output.
//!
//! Snapshot fields arrive as arbitrary JSON shapes: plain strings,
//! nested structured blocks, lists of blocks, or primitives. Every
//! comparison the aggregator makes happens over the flat text this
//! module produces, so a field of unexpected shape degrades to
//! non-matching text instead of failing the run.

use serde_json::Value;

/// Flatten an arbitrary JSON value into text.
///
/// Rules: null is empty; strings pass through; numbers and booleans
/// stringify; structured blocks collapse to their `text` or `content`
/// sub-field; other objects render as `key: value` lines; arrays join
/// their normalized elements with newlines, dropping empties.
pub fn stringify_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(stringify_content)
                .filter(|text| !text.is_empty())
                .collect();
            parts.join("\n")
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text") {
                return stringify_content(text);
            }
            if let Some(content) = map.get("content") {
                return stringify_content(content);
            }
            let entries: Vec<String> = map
                .iter()
                .map(|(key, value)| {
                    let rendered = stringify_content(value);
                    format!("{key}: {rendered}")
                })
                .collect();
            entries.join("\n")
        }
    }
}

/// Normalize a snapshot field for change detection: flatten to text
/// and trim. Absent fields normalize to the empty string.
pub fn normalize_field(value: Option<&Value>) -> String {
    match value {
        Some(value) => stringify_content(value).trim().to_string(),
        None => String::new(),
    }
}
