//! Core data types for the storage layer.
//!
//! - [`Value`]: a sample value (number, text, boolean or an explicit null gap)
//! - [`Sample`]: a timestamped value with optional ack/quality/source metadata
//! - [`IncomingSample`]: the boundary shape where a missing `val` means "undefined"
//! - [`StorageType`]: the persisted column type of a series
//! - [`SeriesIndex`]: the backend id and type resolved for a series

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A row returned by a backend statement, keyed by column name.
pub type Row = HashMap<String, serde_json::Value>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Value
// =============================================================================

/// A sample value.
///
/// `Null` is a real value marking an explicit gap; it is distinct from a
/// missing value, which never reaches this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as a number: booleans map to 1/0, numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => parse_number(s),
            Self::Null => None,
        }
    }

    /// Turn numeric-looking text into a number; everything else is unchanged.
    pub fn coerce_numeric_text(self) -> Self {
        match self {
            Self::Text(s) => match parse_number(&s) {
                Some(n) => Self::Number(n),
                None => Self::Text(s),
            },
            other => other,
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// =============================================================================
// StorageType
// =============================================================================

/// Persisted type of a series. Each type has its own table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StorageType {
    Number,
    String,
    #[strum(to_string = "boolean", serialize = "bool")]
    #[serde(alias = "bool")]
    Boolean,
}

impl StorageType {
    /// Numeric code stored in the series registry.
    pub fn code(self) -> i64 {
        match self {
            Self::Number => 0,
            Self::String => 1,
            Self::Boolean => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Number),
            1 => Some(Self::String),
            2 => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Type a series gets when its first value is written without a configured type.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Text(_) => Self::String,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) | Value::Null => Self::Number,
        }
    }

    /// Convert `value` to this type. `None` when no sensible conversion exists.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Number, v) => v.as_f64().map(Value::Number),
            (Self::String, Value::Text(s)) => Some(Value::Text(s.clone())),
            (Self::String, Value::Number(n)) => Some(Value::Text(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::Text(b.to_string())),
            (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (Self::Boolean, Value::Number(n)) => Some(Value::Bool(*n != 0.0)),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
        }
    }
}

// =============================================================================
// Sample
// =============================================================================

/// A timestamped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds.
    pub ts: i64,
    pub val: Value,
    /// Time of the last actual value change, when the producer tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lc: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<bool>,
    #[serde(default, rename = "q", skip_serializing_if = "Option::is_none")]
    pub quality: Option<i32>,
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Sample {
    pub fn new(ts: i64, val: impl Into<Value>) -> Self {
        Self {
            ts,
            val: val.into(),
            lc: None,
            ack: None,
            quality: None,
            source: None,
        }
    }

    /// An explicit gap marker at `ts`.
    pub fn null(ts: i64) -> Self {
        Self::new(ts, Value::Null)
    }

    pub fn with_lc(mut self, lc: i64) -> Self {
        self.lc = Some(lc);
        self
    }

    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Decode a backend row for a series stored as `storage_type`.
    pub fn from_row(row: &Row, storage_type: StorageType) -> Option<Self> {
        let ts = row.get("ts").and_then(json_i64)?;
        let val = match row.get("val") {
            None | Some(serde_json::Value::Null) => Value::Null,
            Some(raw) => match storage_type {
                StorageType::Number => raw.as_f64().map(Value::Number).unwrap_or(Value::Null),
                StorageType::String => match raw {
                    serde_json::Value::String(s) => Value::Text(s.clone()),
                    other => Value::Text(other.to_string()),
                },
                StorageType::Boolean => json_bool(raw).map(Value::Bool).unwrap_or(Value::Null),
            },
        };

        Some(Self {
            ts,
            val,
            lc: None,
            ack: row.get("ack").and_then(json_bool),
            quality: row
                .get("q")
                .and_then(json_i64)
                .and_then(|q| i32::try_from(q).ok()),
            source: row
                .get("_from")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

fn json_i64(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

fn json_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        other => json_i64(other).map(|n| n != 0),
    }
}

// =============================================================================
// IncomingSample
// =============================================================================

/// A sample as submitted by a producer.
///
/// A missing `val` field is "undefined" and rejected; `"val": null` is a gap.
/// A missing `ts` means "now".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IncomingSample {
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub val: Option<Value>,
    #[serde(default)]
    pub lc: Option<i64>,
    #[serde(default)]
    pub ack: Option<bool>,
    #[serde(default, rename = "q")]
    pub quality: Option<i32>,
    #[serde(default, rename = "from")]
    pub source: Option<String>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl IncomingSample {
    /// Resolve into a [`Sample`]; `None` when the value is undefined.
    pub fn into_sample(self, now: i64) -> Option<Sample> {
        let val = self.val?;
        Some(Sample {
            ts: self.ts.unwrap_or(now),
            val,
            lc: self.lc,
            ack: self.ack,
            quality: self.quality,
            source: self.source,
        })
    }
}

impl From<Sample> for IncomingSample {
    fn from(sample: Sample) -> Self {
        Self {
            ts: Some(sample.ts),
            val: Some(sample.val),
            lc: sample.lc,
            ack: sample.ack,
            quality: sample.quality,
            source: sample.source,
        }
    }
}

// =============================================================================
// SeriesIndex
// =============================================================================

/// Backend identity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesIndex {
    pub id: i64,
    pub storage_type: StorageType,
}
