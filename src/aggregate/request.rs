//! Aggregation request and its normalised plan.

use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config;
use crate::query::QueryError;

/// One day in milliseconds; the default window length.
pub const DAY_MS: i64 = 86_400_000;

/// Default integral unit: values per minute.
pub const DEFAULT_INTEGRAL_UNIT_MS: f64 = 60_000.0;

// =============================================================================
// Modes and policies
// =============================================================================

/// How samples are reduced.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum AggregateMode {
    Max,
    Min,
    #[default]
    Average,
    Total,
    Count,
    Minmax,
    Percentile,
    Quantile,
    Integral,
    IntegralTotal,
    /// Raw samples.
    None,
    /// Raw samples without consecutive repeats.
    Onchange,
}

impl AggregateMode {
    /// Modes that pass raw samples through instead of bucketing.
    pub fn is_raw(self) -> bool {
        matches!(self, Self::None | Self::Onchange)
    }
}

impl<'de> Deserialize<'de> for AggregateMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        match text.trim() {
            "" => Ok(Self::default()),
            "avg" => Ok(Self::Average),
            trimmed => Self::from_str(trimmed)
                .map_err(|_| D::Error::custom(format!("unknown aggregate '{text}'"))),
        }
    }
}

/// Treatment of null values in the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// Keep nulls (`false`).
    #[default]
    Keep,
    /// Replace with the previous non-null value (`true`).
    Previous,
    /// Replace with zero (`0`).
    Zero,
    /// Remove null points.
    Drop,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNullPolicy {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for NullPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawNullPolicy::deserialize(deserializer)? {
            RawNullPolicy::Bool(false) => Ok(Self::Keep),
            RawNullPolicy::Bool(true) => Ok(Self::Previous),
            RawNullPolicy::Int(0) => Ok(Self::Zero),
            RawNullPolicy::Int(n) => Err(D::Error::custom(format!("invalid ignoreNull {n}"))),
            RawNullPolicy::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" | "false" | "keep" => Ok(Self::Keep),
                "true" | "previous" => Ok(Self::Previous),
                "0" | "zero" => Ok(Self::Zero),
                "drop" | "ignore" => Ok(Self::Drop),
                _ => Err(D::Error::custom(format!("invalid ignoreNull '{s}'"))),
            },
        }
    }
}

/// Boundary treatment of integrals.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IntegralInterpolation {
    /// Linear between neighbours; trapezoid areas.
    #[default]
    Linear,
    /// Values hold until the next sample; rectangle areas.
    None,
}

/// Explicit bucket window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn width(&self) -> i64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> i64 {
        self.start + self.width() / 2
    }
}

// =============================================================================
// AggregationRequest
// =============================================================================

fn optional_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(config::optional_number(deserializer)?.map(|n| n as i64))
}

fn optional_digits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    config::optional_count(deserializer)?
        .map(|n| u32::try_from(n).map_err(D::Error::custom))
        .transpose()
}

/// A history query as submitted by a caller.
///
/// Every field is optional; numbers and flags may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Window start, epoch ms. Defaults to one day before `end`.
    #[serde(deserialize_with = "optional_ms")]
    pub start: Option<i64>,
    /// Window end, epoch ms. Defaults to now.
    #[serde(deserialize_with = "optional_ms")]
    pub end: Option<i64>,
    /// Bucket width in ms. Derived from `count` when unset.
    #[serde(deserialize_with = "optional_ms")]
    pub step: Option<i64>,
    /// Bucket count, or the maximum number of raw samples.
    #[serde(deserialize_with = "config::optional_count")]
    pub count: Option<usize>,
    pub aggregate: AggregateMode,
    pub ignore_null: NullPolicy,
    /// Decimal places of numeric results.
    #[serde(deserialize_with = "optional_digits")]
    pub round: Option<u32>,
    #[serde(deserialize_with = "config::boolean")]
    pub return_newest_entries: bool,
    #[serde(deserialize_with = "config::boolean")]
    pub remove_border_values: bool,
    /// 0..=100, for `percentile`.
    #[serde(deserialize_with = "config::optional_number")]
    pub percentile: Option<f64>,
    /// 0..=1, for `quantile`.
    #[serde(deserialize_with = "config::optional_number")]
    pub quantile: Option<f64>,
    /// Integral divisor in ms (default one minute).
    #[serde(deserialize_with = "config::optional_number")]
    pub integral_unit: Option<f64>,
    pub integral_interpolation: IntegralInterpolation,
    /// Tag each point with the series id.
    #[serde(deserialize_with = "config::boolean")]
    pub add_id: bool,
    /// Upper bound on the bucket count.
    #[serde(deserialize_with = "config::optional_count")]
    pub limit: Option<usize>,
    /// Explicit bucket windows replacing uniform steps.
    pub intervals: Vec<Interval>,
}

/// A validated request with every default resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    /// Index of the last uniform bucket counted from zero.
    pub max_index: i64,
    pub mode: AggregateMode,
    pub count: Option<usize>,
    pub null_policy: NullPolicy,
    pub round: Option<u32>,
    pub return_newest_entries: bool,
    pub remove_border_values: bool,
    /// Quantile in `0..=1` for percentile/quantile modes.
    pub q: f64,
    pub integral_unit: f64,
    pub interpolation: IntegralInterpolation,
    pub add_id: bool,
    pub intervals: Vec<Interval>,
}

impl AggregationRequest {
    /// Resolve defaults and validate.
    ///
    /// # Errors
    /// `QueryError::Validation` for empty windows, out-of-range
    /// percentiles/quantiles, non-positive units or malformed intervals.
    pub fn normalize(
        &self,
        now: i64,
        bucket_limit: usize,
        default_count: usize,
    ) -> Result<Plan, QueryError> {
        let mode = self.aggregate;
        let mut return_newest_entries = self.return_newest_entries;

        let mut intervals = self.intervals.clone();
        intervals.sort_by_key(|i| i.start);
        for pair in intervals.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(QueryError::Validation(format!(
                    "intervals overlap at {}",
                    pair[1].start
                )));
            }
        }
        if let Some(bad) = intervals.iter().find(|i| i.end <= i.start) {
            return Err(QueryError::Validation(format!(
                "interval [{}, {}) is empty",
                bad.start, bad.end
            )));
        }
        // pre/post slots extend one interval width past the outer intervals
        if let Some(bad) = intervals.iter().find(|i| i.end.checked_sub(i.start).is_none()) {
            return Err(out_of_range(bad.start, bad.end));
        }
        if let (Some(first), Some(last)) = (intervals.first(), intervals.last())
            && (first.start.checked_sub(first.width()).is_none()
                || last.end.checked_add(last.width()).is_none())
        {
            return Err(out_of_range(first.start, last.end));
        }

        let (mut start, mut end) = match (intervals.first(), intervals.last()) {
            (Some(first), Some(last)) => (first.start, last.end),
            _ => {
                let end = self.end.unwrap_or(now);
                let start = match self.start {
                    Some(start) => start,
                    None if mode.is_raw() && self.count.is_some() => {
                        return_newest_entries = true;
                        0
                    }
                    None => end.saturating_sub(DAY_MS),
                };
                (start, end)
            }
        };
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        if start == end {
            return Err(QueryError::Validation(format!(
                "empty time window at {start}"
            )));
        }

        let q = match mode {
            AggregateMode::Percentile => {
                let p = self.percentile.unwrap_or(50.0);
                if !(0.0..=100.0).contains(&p) {
                    return Err(QueryError::Validation(format!(
                        "percentile must be within 0..100, got {p}"
                    )));
                }
                p / 100.0
            }
            AggregateMode::Quantile => {
                let q = self.quantile.unwrap_or(0.5);
                if !(0.0..=1.0).contains(&q) {
                    return Err(QueryError::Validation(format!(
                        "quantile must be within 0..1, got {q}"
                    )));
                }
                q
            }
            _ => 0.5,
        };

        let integral_unit = self.integral_unit.unwrap_or(DEFAULT_INTEGRAL_UNIT_MS);
        if !integral_unit.is_finite() || integral_unit <= 0.0 {
            return Err(QueryError::Validation(format!(
                "integralUnit must be positive, got {integral_unit}"
            )));
        }

        let span = end
            .checked_sub(start)
            .ok_or_else(|| out_of_range(start, end))?;
        let limit = self.limit.unwrap_or(bucket_limit).clamp(1, bucket_limit.max(1)) as i64;
        let count = i64::try_from(self.count.unwrap_or(default_count).max(1)).unwrap_or(i64::MAX);
        let mut step = match self.step {
            Some(step) if step > 0 => step,
            _ => (span / count).max(1),
        };
        let buckets = div_ceil(span, step).ok_or_else(|| out_of_range(start, end))?;
        if buckets > limit {
            step = div_ceil(span, limit).ok_or_else(|| out_of_range(start, end))?;
        }
        let max_index = div_ceil(span, step).ok_or_else(|| out_of_range(start, end))? - 1;
        if intervals.is_empty()
            && (start.checked_sub(step).is_none() || end.checked_add(step).is_none())
        {
            return Err(out_of_range(start, end));
        }

        Ok(Plan {
            start,
            end,
            step,
            max_index,
            mode,
            count: self.count,
            null_policy: self.ignore_null,
            round: self.round,
            return_newest_entries,
            remove_border_values: self.remove_border_values,
            q,
            integral_unit,
            interpolation: self.integral_interpolation,
            add_id: self.add_id,
            intervals,
        })
    }
}

fn div_ceil(a: i64, b: i64) -> Option<i64> {
    a.checked_add(b - 1).map(|n| n / b)
}

fn out_of_range(start: i64, end: i64) -> QueryError {
    QueryError::Validation(format!("time window [{start}, {end}] is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> AggregationRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AggregateMode::from_str("integralTotal").unwrap(), AggregateMode::IntegralTotal);
        assert_eq!(AggregateMode::from_str("MINMAX").unwrap(), AggregateMode::Minmax);
        assert_eq!(request(json!({"aggregate": "avg"})).aggregate, AggregateMode::Average);
        assert_eq!(request(json!({})).aggregate, AggregateMode::Average);
        assert!(serde_json::from_value::<AggregationRequest>(json!({"aggregate": "mode"})).is_err());
        assert_eq!(AggregateMode::Onchange.to_string(), "onchange");
    }

    #[test]
    fn test_null_policy_parsing() {
        assert_eq!(request(json!({"ignoreNull": false})).ignore_null, NullPolicy::Keep);
        assert_eq!(request(json!({"ignoreNull": true})).ignore_null, NullPolicy::Previous);
        assert_eq!(request(json!({"ignoreNull": 0})).ignore_null, NullPolicy::Zero);
        assert_eq!(request(json!({"ignoreNull": "0"})).ignore_null, NullPolicy::Zero);
        assert_eq!(request(json!({"ignoreNull": "drop"})).ignore_null, NullPolicy::Drop);
    }

    #[test]
    fn test_loose_fields() {
        let r = request(json!({
            "start": "1000", "end": 5000, "count": "4", "round": "2",
            "returnNewestEntries": "true", "addId": 1
        }));
        assert_eq!(r.start, Some(1000));
        assert_eq!(r.count, Some(4));
        assert_eq!(r.round, Some(2));
        assert!(r.return_newest_entries);
        assert!(r.add_id);
    }

    #[test]
    fn test_defaults_and_swap() {
        let plan = request(json!({})).normalize(DAY_MS * 2, 2000, 500).unwrap();
        assert_eq!(plan.end, DAY_MS * 2);
        assert_eq!(plan.start, DAY_MS);
        assert_eq!(plan.step, DAY_MS / 500);

        let plan = request(json!({"start": 10_000, "end": 0, "count": 10}))
            .normalize(0, 2000, 500)
            .unwrap();
        assert_eq!((plan.start, plan.end, plan.step, plan.max_index), (0, 10_000, 1000, 9));
    }

    #[test]
    fn test_empty_window_is_rejected() {
        let err = request(json!({"start": 5, "end": 5}))
            .normalize(0, 2000, 500)
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_extreme_windows_are_rejected() {
        for window in [
            json!({"start": "-9e18", "end": "9e18"}),
            json!({"start": i64::MIN, "end": i64::MAX}),
            json!({"start": 0, "end": i64::MAX, "step": 10}),
            json!({"start": i64::MIN, "end": 0, "step": 10}),
            json!({"intervals": [{"start": i64::MIN, "end": 0}]}),
            json!({"intervals": [{"start": 0, "end": i64::MAX}]}),
        ] {
            let err = request(window.clone()).normalize(0, 2000, 500).unwrap_err();
            assert!(matches!(err, QueryError::Validation(_)), "{window}: {err:?}");
        }

        // a missing start below the representable range saturates
        let err = request(json!({"end": i64::MIN}))
            .normalize(0, 2000, 500)
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_step_is_capped_by_limit() {
        let plan = request(json!({"start": 0, "end": 100_000, "step": 1}))
            .normalize(0, 2000, 500)
            .unwrap();
        assert_eq!(plan.step, 50);
        assert_eq!(plan.max_index, 1999);

        let plan = request(json!({"start": 0, "end": 100_000, "step": 1, "limit": 10}))
            .normalize(0, 2000, 500)
            .unwrap();
        assert_eq!(plan.step, 10_000);
    }

    #[test]
    fn test_raw_count_without_start_reads_newest() {
        let plan = request(json!({"aggregate": "none", "count": 5, "end": 1000}))
            .normalize(0, 2000, 500)
            .unwrap();
        assert_eq!(plan.start, 0);
        assert!(plan.return_newest_entries);
    }

    #[test]
    fn test_percentile_bounds() {
        let plan = request(json!({"aggregate": "percentile", "percentile": 90, "start": 0, "end": 10}))
            .normalize(0, 2000, 500)
            .unwrap();
        assert!((plan.q - 0.9).abs() < 1e-12);

        assert!(
            request(json!({"aggregate": "percentile", "percentile": 101, "start": 0, "end": 10}))
                .normalize(0, 2000, 500)
                .is_err()
        );
        assert!(
            request(json!({"aggregate": "quantile", "quantile": -0.1, "start": 0, "end": 10}))
                .normalize(0, 2000, 500)
                .is_err()
        );
    }

    #[test]
    fn test_intervals_define_window() {
        let plan = request(json!({
            "intervals": [{"start": 200, "end": 300}, {"start": 0, "end": 100}]
        }))
        .normalize(0, 2000, 500)
        .unwrap();
        assert_eq!((plan.start, plan.end), (0, 300));
        assert_eq!(plan.intervals[0].start, 0);

        assert!(
            request(json!({"intervals": [{"start": 0, "end": 100}, {"start": 50, "end": 150}]}))
                .normalize(0, 2000, 500)
                .is_err()
        );
    }
}
