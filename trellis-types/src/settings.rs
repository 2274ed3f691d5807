use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open key/value settings attached to a bucket or metric aggregation.
///
/// Dashboards persist these as untyped JSON, and old editors stored numbers
/// as strings, so every numeric accessor accepts both encodings. All
/// string-to-number fallback rules live here rather than inline in the
/// request builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(pub Map<String, Value>);

pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl Settings {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or(default).to_string()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(coerce_i64)
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    /// Integer setting where zero is not a valid value: absent, unparseable
    /// and zero all fall back to the default.
    pub fn get_size_or(&self, key: &str, default: i64) -> i64 {
        match self.get_i64(key) {
            Some(0) | None => default,
            Some(v) => v,
        }
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Legacy editors persisted cleared settings as the string "null".
    pub fn scrub_legacy_nulls(&mut self) {
        self.0.retain(|_, v| v.as_str() != Some("null"));
    }

    /// Rewrite a string-encoded number in place, leaving other value kinds
    /// untouched. Search engines reject quoted numbers in integer fields
    /// such as min_doc_count.
    pub fn coerce_entry_to_i64(&mut self, key: &str) {
        if let Some(Value::String(s)) = self.0.get(key) {
            if let Ok(v) = s.trim().parse::<i64>() {
                self.0.insert(key.to_string(), Value::from(v));
            }
        }
    }

    pub fn coerce_entry_to_f64(&mut self, key: &str) {
        if let Some(Value::String(s)) = self.0.get(key) {
            if let Ok(v) = s.trim().parse::<f64>() {
                self.0.insert(key.to_string(), Value::from(v));
            }
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}
