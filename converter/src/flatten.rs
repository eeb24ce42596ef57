//! Nested MRIQC JSON → flat [`MetricRecord`].
//!
//! Leaf keys are the path segments from the root joined with `.`; array
//! indices are segments of their own, so element 0 of `spikes` becomes
//! `spikes.0`. Objects are visited in sorted key order (the default
//! `serde_json` map is a `BTreeMap`) and the record itself is a sorted map, so
//! the same document always yields the same record.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::error::MalformedMetricsError;

/// Separator between path segments of a flattened key.
pub const KEY_SEPARATOR: char = '.';

/// Lexical form written for JSON `null` leaves (the BIDS missing-value marker).
pub const ABSENT: &str = "n/a";

/// Top-level MRIQC keys that carry metadata rather than metrics.
pub const DEFAULT_EXCLUDED_KEYS: &[&str] = &[
    "bids_meta",
    "provenance",
    "qi_1",
    "qi_2",
    "size_x",
    "size_y",
    "size_z",
    "spacing_x",
    "spacing_y",
    "spacing_z",
];

/// A scalar metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A JSON number, kept exactly as parsed.
    Number(Number),
    /// A JSON string.
    Text(String),
    /// A JSON boolean.
    Bool(bool),
    /// A JSON `null`.
    Absent,
}

/// One subject (and optional session)'s flattened QC output.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    subject_id: String,
    session_id: Option<String>,
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricRecord {
    /// Subject identifier (no `sub-` prefix).
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Session identifier (no `ses-` prefix), if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Flattened metrics in key order.
    #[must_use]
    pub fn metrics(&self) -> &BTreeMap<String, MetricValue> {
        &self.metrics
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the record has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Flattens one metrics document.
///
/// # Errors
///
/// Returns [`MalformedMetricsError::NotAnObject`] if `raw` is not a JSON
/// object, or [`MalformedMetricsError::EmptySubject`] if `subject_id` is empty.
pub fn flatten(
    raw: &Value,
    subject_id: &str,
    session_id: Option<&str>,
) -> Result<MetricRecord, MalformedMetricsError> {
    if subject_id.is_empty() {
        return Err(MalformedMetricsError::EmptySubject);
    }
    let Value::Object(root) = raw else {
        return Err(MalformedMetricsError::NotAnObject {
            found: json_type(raw),
        });
    };

    let mut metrics = BTreeMap::new();
    for (key, value) in root {
        walk(value, key.clone(), &mut metrics);
    }

    Ok(MetricRecord {
        subject_id: subject_id.to_owned(),
        session_id: session_id.map(str::to_owned),
        metrics,
    })
}

/// Parses `text` as JSON and flattens it.
///
/// # Errors
///
/// Returns [`MalformedMetricsError::InvalidJson`] for unparsable input, plus
/// the errors of [`flatten`].
pub fn flatten_str(
    text: &str,
    subject_id: &str,
    session_id: Option<&str>,
) -> Result<MetricRecord, MalformedMetricsError> {
    let raw: Value = serde_json::from_str(text)?;
    flatten(&raw, subject_id, session_id)
}

/// Removes top-level metadata keys before flattening. Returns how many keys
/// were removed.
pub fn strip_metadata<S: AsRef<str>>(document: &mut Value, excluded: &[S]) -> usize {
    let Value::Object(map) = document else {
        return 0;
    };
    excluded
        .iter()
        .filter(|key| map.remove(key.as_ref()).is_some())
        .count()
}

fn walk(value: &Value, prefix: String, out: &mut BTreeMap<String, MetricValue>) {
    match value {
        Value::Object(map) => walk_object(map, &prefix, out),
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                walk(child, format!("{prefix}{KEY_SEPARATOR}{idx}"), out);
            }
        }
        scalar => emit(prefix, scalar_value(scalar), out),
    }
}

fn walk_object(map: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, MetricValue>) {
    for (key, child) in map {
        walk(child, format!("{prefix}{KEY_SEPARATOR}{key}"), out);
    }
}

fn emit(key: String, value: MetricValue, out: &mut BTreeMap<String, MetricValue>) {
    if !out.contains_key(&key) {
        out.insert(key, value);
        return;
    }
    // Two paths collapsed onto one key (`{"a.b": 1, "a": {"b": 2}}`).
    let mut n = 2usize;
    loop {
        let candidate = format!("{key}~{n}");
        if !out.contains_key(&candidate) {
            tracing::warn!(key = %key, renamed = %candidate, "flattened key collision");
            out.insert(candidate, value);
            return;
        }
        n += 1;
    }
}

fn scalar_value(value: &Value) -> MetricValue {
    match value {
        Value::Number(n) => MetricValue::Number(n.clone()),
        Value::String(s) => MetricValue::Text(s.clone()),
        Value::Bool(b) => MetricValue::Bool(*b),
        // Containers never reach here; null is the only remaining case.
        Value::Null | Value::Array(_) | Value::Object(_) => MetricValue::Absent,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Counts the scalar leaves of a JSON value (empty containers have none).
#[must_use]
pub fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(leaf_count).sum(),
        Value::Array(items) => items.iter().map(leaf_count).sum(),
        _ => 1,
    }
}
