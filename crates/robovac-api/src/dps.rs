//! Data Point maps as carried in the `"dps"` object of a payload.
//!
//! The wire form is a JSON object keyed by decimal strings (`{"152": "AggO"}`).
//! Indices are parsed into `u8` (1..=255); values keep their JSON type so
//! unknown indices survive a round trip untouched.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ── DpsValue ─────────────────────────────────────────────────────────

/// A single Data Point value.
///
/// Byte-sequence Data Points travel as base64 inside [`DpsValue::String`];
/// decoding them is left to the typed model in `robovac-core`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpsValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    /// Floats, nested objects, arrays, and nulls, preserved as-is.
    Other(Value),
}

impl DpsValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Boolean(*b),
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Other(value.clone()), Self::Integer),
            other => Self::Other(other.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::String(s) => Value::String(s.clone()),
            Self::Other(v) => v.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the JSON type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Other(Value::Null) => "null",
            Self::Other(Value::Number(_)) => "float",
            Self::Other(Value::Array(_)) => "array",
            Self::Other(_) => "object",
        }
    }
}

impl fmt::Display for DpsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for DpsValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for DpsValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for DpsValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for DpsValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

// ── DpsMap ───────────────────────────────────────────────────────────

/// Data Point index to value.
///
/// Ordered by index so encoded payloads are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DpsMap(BTreeMap<u8, DpsValue>);

impl DpsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding exactly one Data Point.
    pub fn single(index: u8, value: impl Into<DpsValue>) -> Self {
        let mut map = Self::new();
        map.insert(index, value);
        map
    }

    /// Build from the JSON `"dps"` object.
    ///
    /// Keys that are not integers in 1..=255 are skipped.
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        let mut map = Self::new();
        for (key, value) in object {
            match key.parse::<u8>() {
                Ok(index) if index != 0 => {
                    map.0.insert(index, DpsValue::from_json(value));
                }
                _ => tracing::debug!(key = %key, "skipping non-numeric DPS key"),
            }
        }
        map
    }

    /// Extract the Data Points from a decrypted payload.
    ///
    /// Looks at `dps` first, then `data.dps`. Payloads with neither yield
    /// an empty map.
    pub fn from_payload(payload: &Value) -> Self {
        payload
            .get("dps")
            .or_else(|| payload.get("data").and_then(|data| data.get("dps")))
            .and_then(Value::as_object)
            .map(Self::from_json_object)
            .unwrap_or_default()
    }

    /// The wire form: a JSON object keyed by decimal strings.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(index, value)| (index.to_string(), value.to_json()))
                .collect(),
        )
    }

    pub fn get(&self, index: u8) -> Option<&DpsValue> {
        self.0.get(&index)
    }

    pub fn insert(&mut self, index: u8, value: impl Into<DpsValue>) -> Option<DpsValue> {
        self.0.insert(index, value.into())
    }

    pub fn remove(&mut self, index: u8) -> Option<DpsValue> {
        self.0.remove(&index)
    }

    pub fn contains(&self, index: u8) -> bool {
        self.0.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, u8, DpsValue> {
        self.0.iter()
    }

    /// Overlay `update` onto this map. Indices absent from `update` keep their value.
    pub fn merge(&mut self, update: &DpsMap) {
        for (index, value) in update {
            self.0.insert(*index, value.clone());
        }
    }
}

impl<'de> Deserialize<'de> for DpsMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_json_object(&object))
    }
}

impl FromIterator<(u8, DpsValue)> for DpsMap {
    fn from_iter<I: IntoIterator<Item = (u8, DpsValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DpsMap {
    type Item = (&'a u8, &'a DpsValue);
    type IntoIter = btree_map::Iter<'a, u8, DpsValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
