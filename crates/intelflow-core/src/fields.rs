//! Dotted-path field extraction from semi-structured payloads.
//!
//! Log records are assembled by walking configured dotted paths through the
//! inbound JSON document. A missing key anywhere along the path resolves to
//! an empty value rather than an error: the record keeps its shape even when
//! the payload is sparse.

use serde::Deserialize;
use serde_json::Value;

/// Result of walking a dotted path: a scalar rendered as text, or a named
/// list when the path lands on an array.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(String),
    List { name: String, items: Vec<Value> },
}

impl FieldValue {
    /// Text rendering used when the value lands in a log record.
    pub fn into_text(self) -> String {
        match self {
            FieldValue::Scalar(s) => s,
            FieldValue::List { items, .. } => {
                serde_json::to_string(&items).unwrap_or_default()
            }
        }
    }
}

/// Render a JSON leaf as record text. Strings are unquoted; null is empty.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk `path` (dot-separated keys) through `obj`.
///
/// Returns a [`FieldValue::List`] named after the last path segment when the
/// walk ends on an array, a [`FieldValue::Scalar`] otherwise. Any missing
/// intermediate key yields an empty scalar.
pub fn extract(obj: &Value, path: &str) -> FieldValue {
    let mut current = obj;
    let mut last_name = "";

    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => {
                current = next;
                last_name = segment;
            }
            None => return FieldValue::Scalar(String::new()),
        }
    }

    match current {
        Value::Array(items) => FieldValue::List {
            name: last_name.to_string(),
            items: items.clone(),
        },
        other => FieldValue::Scalar(scalar_text(other)),
    }
}

/// A field specification from configuration: either a single dotted path, or
/// several paths joined with the configured separator into one column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Path(String),
    Joined(Vec<String>),
}

/// Render one ordered log record from `obj` per the configured specs.
pub fn render_record(obj: &Value, specs: &[FieldSpec], separator: &str) -> Vec<String> {
    specs
        .iter()
        .map(|spec| match spec {
            FieldSpec::Path(path) => extract(obj, path).into_text(),
            FieldSpec::Joined(paths) => paths
                .iter()
                .map(|p| extract(obj, p).into_text())
                .collect::<Vec<_>>()
                .join(separator),
        })
        .collect()
}
