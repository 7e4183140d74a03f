//! Lenient field deserializers for hand-written series options.
//!
//! Series options come from YAML files and query strings written by people,
//! so `"true"`, `1` and `true` all mean yes, numbers may arrive quoted, and
//! durations are either plain numbers or humantime strings (`"500ms"`).
//! Everything is normalised here, once, into typed values.

use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::storage::StorageType;

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_f64(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Boolean from `true`, `1`, `"true"`, `"on"`, ...
pub fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => Ok(b),
        Loose::Int(n) => Ok(n != 0),
        Loose::Float(f) => Ok(f != 0.0),
        Loose::Text(s) => {
            parse_bool(&s).ok_or_else(|| D::Error::custom(format!("invalid boolean '{s}'")))
        }
    }
}

fn loose_f64<E: serde::de::Error>(value: Loose) -> Result<f64, E> {
    match value {
        Loose::Int(n) => Ok(n as f64),
        Loose::Float(f) => Ok(f),
        Loose::Text(s) => parse_f64(&s).ok_or_else(|| E::custom(format!("invalid number '{s}'"))),
        Loose::Bool(b) => Err(E::custom(format!("expected a number, got {b}"))),
    }
}

/// Number from `1.5` or `"1.5"`.
pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    loose_f64(Loose::deserialize(deserializer)?)
}

/// Optional number; `null` and `""` mean unset.
pub fn optional_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => loose_f64(value).map(Some),
    }
}

/// Non-negative integer from `10`, `10.0` or `"10"`.
pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let n = loose_f64(Loose::deserialize(deserializer)?)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(D::Error::custom(format!("expected a non-negative integer, got {n}")));
    }
    Ok(n as usize)
}

/// Optional non-negative integer; `null` and `""` mean unset.
pub fn optional_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<usize>, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => {
            let n = loose_f64::<D::Error>(value)?;
            if n < 0.0 || n.fract() != 0.0 {
                return Err(D::Error::custom(format!(
                    "expected a non-negative integer, got {n}"
                )));
            }
            Ok(Some(n as usize))
        }
    }
}

fn duration_in<E: serde::de::Error>(value: Loose, unit: Duration) -> Result<Duration, E> {
    let scaled = |n: f64| -> Result<Duration, E> {
        if !n.is_finite() || n < 0.0 {
            return Err(E::custom(format!("invalid duration {n}")));
        }
        Duration::try_from_secs_f64(unit.as_secs_f64() * n)
            .map_err(|e| E::custom(format!("invalid duration {n}: {e}")))
    };
    match value {
        Loose::Int(n) => scaled(n as f64),
        Loose::Float(f) => scaled(f),
        Loose::Text(s) => match parse_f64(&s) {
            Some(n) => scaled(n),
            None if s.trim().is_empty() => Ok(Duration::ZERO),
            None => super::parse_duration(&s).map_err(E::custom),
        },
        Loose::Bool(b) => Err(E::custom(format!("expected a duration, got {b}"))),
    }
}

/// Duration where bare numbers are milliseconds.
pub fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    duration_in(Loose::deserialize(deserializer)?, Duration::from_millis(1))
}

/// Duration where bare numbers are seconds.
pub fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    duration_in(Loose::deserialize(deserializer)?, Duration::from_secs(1))
}

/// Optional storage type; `null` and `""` mean "infer from the first value".
pub fn storage_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<StorageType>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => StorageType::from_str(s.trim())
            .map(Some)
            .map_err(|_| D::Error::custom(format!("unknown storage type '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Options {
        #[serde(default, deserialize_with = "boolean")]
        flag: bool,
        #[serde(default, deserialize_with = "optional_number")]
        limit: Option<f64>,
        #[serde(default, deserialize_with = "millis")]
        wait: Duration,
        #[serde(default, deserialize_with = "seconds")]
        keep: Duration,
        #[serde(default, deserialize_with = "storage_type")]
        kind: Option<StorageType>,
    }

    fn options(value: serde_json::Value) -> Result<Options, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_booleans() {
        for truthy in [json!(true), json!(1), json!("true"), json!("ON"), json!("1")] {
            assert!(options(json!({ "flag": truthy })).unwrap().flag);
        }
        for falsy in [json!(false), json!(0), json!("false"), json!("")] {
            assert!(!options(json!({ "flag": falsy })).unwrap().flag);
        }
        assert!(options(json!({"flag": "maybe"})).is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(options(json!({"limit": "2.5"})).unwrap().limit, Some(2.5));
        assert_eq!(options(json!({"limit": 3})).unwrap().limit, Some(3.0));
        assert_eq!(options(json!({"limit": ""})).unwrap().limit, None);
        assert_eq!(options(json!({"limit": null})).unwrap().limit, None);
        assert!(options(json!({"limit": "abc"})).is_err());
    }

    #[test]
    fn test_durations() {
        let p = options(json!({"wait": 250, "keep": "30"})).unwrap();
        assert_eq!(p.wait, Duration::from_millis(250));
        assert_eq!(p.keep, Duration::from_secs(30));

        let p = options(json!({"wait": "1s", "keep": "1d"})).unwrap();
        assert_eq!(p.wait, Duration::from_secs(1));
        assert_eq!(p.keep, Duration::from_secs(86_400));

        assert!(options(json!({"wait": -5})).is_err());
        assert!(options(json!({"wait": "soon"})).is_err());

        // larger than any Duration
        assert!(options(json!({"wait": 1e30})).is_err());
        assert!(options(json!({"keep": "1e30"})).is_err());
        assert!(options(json!({"keep": 1e20})).is_err());
    }

    #[test]
    fn test_storage_type() {
        assert_eq!(options(json!({"kind": "Boolean"})).unwrap().kind, Some(StorageType::Boolean));
        assert_eq!(options(json!({"kind": ""})).unwrap().kind, None);
        assert!(options(json!({"kind": "blob"})).is_err());
    }
}
