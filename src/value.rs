//! Value model shared by task contexts, conditions, and the expression front-end.
//!
//! Mirrors the shape of `dsl-core::ast::Literal` (a flat, serde-friendly sum
//! type over the handful of kinds rules actually compare) rather than
//! wrapping `serde_json::Value` directly, so evaluation in [`crate::condition`]
//! stays an exhaustive match instead of a tree walk over JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A resolved attribute value: request/context/system fields, and the
/// operands of condition nodes, are all this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Best-effort coercion to `f64`, accepting both numeric and numeric-string
    /// operands. Used by numeric comparators and `sortBy` resolution.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Seq(_) | Value::Map(_) => None,
        }
    }

    /// Best-effort coercion to `i64`. Falls back to `as_f64` then truncates;
    /// `sortBy` fields accept both numeric and string operands this way.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::Seq(_) | Value::Map(_) => None,
        }
    }

    /// String form used by `StartsWith`/`EndsWith`/string-fallback equality.
    pub fn as_string_form(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Seq(items) => {
                let parts: Vec<String> = items.iter().map(Value::as_string_form).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(_) => self.as_string_form_map_fallback(),
        }
    }

    fn as_string_form_map_fallback(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
            || matches!(self, Value::String(s) if s.trim().parse::<f64>().is_ok())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string_form())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::String(String::new()),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Flattens nested maps into dot-joined keys for `TaskContext.request`:
/// `{"a": {"b": 1}}` becomes `{"a.b": 1}`.
pub fn flatten_map(map: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        flatten_into(&key, value, &mut out);
    }
    out
}

fn flatten_into(prefix: &str, value: Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Map(nested) => {
            if nested.is_empty() {
                out.insert(prefix.to_string(), Value::Map(BTreeMap::new()));
            }
            for (k, v) in nested {
                let joined = format!("{prefix}.{k}");
                flatten_into(&joined, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_maps_to_dotted_keys() {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), Value::Int(1));
        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), Value::Map(inner));

        let flat = flatten_map(outer);
        assert_eq!(flat.get("a.b"), Some(&Value::Int(1)));
        assert!(flat.get("a").is_none());
    }

    #[test]
    fn numeric_string_coerces() {
        let v = Value::String("42.5".to_string());
        assert_eq!(v.as_f64(), Some(42.5));
        assert_eq!(Value::String("nope".into()).as_f64(), None);
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Value::Int(1), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }
}
