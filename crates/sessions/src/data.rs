use std::collections::HashMap;

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::error::Result;

/// Per-session key/value bag, stored as one JSON object per row.
///
/// Values are arbitrary JSON (scalars or nested structure), so the bag is
/// schema-free but every value still carries its own type tag. Iteration
/// order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(HashMap<String, Value>);

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to the stored cell form. An empty bag encodes to `"{}"`,
    /// never null, so the cell is always a valid JSON object.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }

    /// Inverse of [`encode`](Self::encode). `"{}"` decodes to an empty
    /// bag, not an error.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Deserialize one stored value into a caller-chosen type.
    pub fn decode_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Call `cb` once per key/value pair, in no particular order.
    pub fn visit(&self, mut cb: impl FnMut(&str, &Value)) {
        for (key, value) in &self.0 {
            cb(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
