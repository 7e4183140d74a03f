//! Per-series ingestion policy.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::loose;
use super::validation::ConfigError;
use crate::storage::StorageType;

/// Default number of buffered samples before a flush is triggered.
pub const DEFAULT_MAX_BUFFERED_LENGTH: usize = 10;

fn default_max_buffered_length() -> usize {
    DEFAULT_MAX_BUFFERED_LENGTH
}

// =============================================================================
// SeriesConfig
// =============================================================================

/// Ingestion policy of one series.
///
/// Replaced wholesale on reconfiguration; never mutated in place.
/// Keys accept both `snake_case` and the camelCase spelling used by producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Collapse bursts to the last value once the series is quiet this long.
    #[serde(
        alias = "debounceTime",
        alias = "debounce",
        deserialize_with = "loose::millis",
        serialize_with = "humantime_serde::serialize"
    )]
    pub debounce_time: Duration,

    /// Drop samples arriving sooner than this after the last stored one.
    #[serde(
        alias = "blockTime",
        deserialize_with = "loose::millis",
        serialize_with = "humantime_serde::serialize"
    )]
    pub block_time: Duration,

    /// Store only samples whose value changed.
    #[serde(alias = "changesOnly", deserialize_with = "loose::boolean")]
    pub changes_only: bool,

    /// Re-assert the last value this often even without a change (zero = off).
    #[serde(
        alias = "changesRelogInterval",
        deserialize_with = "loose::seconds",
        serialize_with = "humantime_serde::serialize"
    )]
    pub changes_relog_interval: Duration,

    /// Minimum numeric change counted as a change (zero = off).
    #[serde(alias = "changesMinDelta", deserialize_with = "loose::number")]
    pub changes_min_delta: f64,

    #[serde(
        alias = "ignoreBelowNumber",
        deserialize_with = "loose::optional_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub ignore_below_number: Option<f64>,

    #[serde(
        alias = "ignoreAboveNumber",
        deserialize_with = "loose::optional_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub ignore_above_number: Option<f64>,

    /// Drop nulls and zeros.
    #[serde(alias = "ignoreZero", deserialize_with = "loose::boolean")]
    pub ignore_zero: bool,

    /// Persisted type; inferred from the first written value when unset.
    #[serde(
        alias = "storageType",
        deserialize_with = "loose::storage_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_type: Option<StorageType>,

    /// Delete persisted rows older than this (zero = keep forever).
    #[serde(
        alias = "retentionSeconds",
        deserialize_with = "loose::seconds",
        serialize_with = "humantime_serde::serialize"
    )]
    pub retention: Duration,

    /// Flush once more samples than this are buffered.
    #[serde(
        alias = "maxBufferedLength",
        default = "default_max_buffered_length",
        deserialize_with = "loose::count"
    )]
    pub max_buffered_length: usize,

    /// Values only grow; a drop means the counter was reset.
    #[serde(alias = "isCounter", deserialize_with = "loose::boolean")]
    pub is_counter: bool,

    /// Do not write remembered unchanged samples ahead of the next change.
    #[serde(alias = "disableSkippedValueLogging", deserialize_with = "loose::boolean")]
    pub disable_skipped_value_logging: bool,

    /// Write `null` gap markers when the series is enabled and disabled.
    #[serde(alias = "writeNulls", deserialize_with = "loose::boolean")]
    pub write_nulls: bool,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            debounce_time: Duration::ZERO,
            block_time: Duration::ZERO,
            changes_only: false,
            changes_relog_interval: Duration::ZERO,
            changes_min_delta: 0.0,
            ignore_below_number: None,
            ignore_above_number: None,
            ignore_zero: false,
            storage_type: None,
            retention: Duration::ZERO,
            max_buffered_length: DEFAULT_MAX_BUFFERED_LENGTH,
            is_counter: false,
            disable_skipped_value_logging: false,
            write_nulls: false,
        }
    }
}

impl SeriesConfig {
    /// Validate option combinations.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` describing the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.changes_min_delta.is_finite() || self.changes_min_delta < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "changes_min_delta must be a non-negative number, got {}",
                self.changes_min_delta
            )));
        }

        if let (Some(below), Some(above)) = (self.ignore_below_number, self.ignore_above_number)
            && below > above
        {
            return Err(ConfigError::ValidationError(format!(
                "ignore_below_number ({below}) is greater than ignore_above_number ({above})"
            )));
        }

        Ok(())
    }

    /// Block-time in whole milliseconds.
    pub fn block_ms(&self) -> i64 {
        self.block_time.as_millis() as i64
    }

    /// Relog interval in whole milliseconds.
    pub fn relog_ms(&self) -> i64 {
        self.changes_relog_interval.as_millis() as i64
    }
}

// =============================================================================
// SeriesEntry / SeriesSet
// =============================================================================

/// A series id with its policy, as written in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub id: String,

    #[serde(flatten)]
    pub config: SeriesConfig,
}

/// Series entries from the main config file plus an include directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesSet {
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
}

impl SeriesSet {
    /// Merge another set into this one.
    pub fn merge(mut self, other: SeriesSet) -> Self {
        self.series.extend(other.series);
        self
    }

    /// Validate every entry and reject duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.series {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "series id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate series id: '{}'",
                    entry.id
                )));
            }
            entry.config.validate().map_err(|e| {
                ConfigError::ValidationError(format!("series '{}': {e}", entry.id))
            })?;
        }
        Ok(())
    }

    /// Load and merge every `*.yaml` / `*.yml` file in a directory.
    pub fn load_from_dir(dir_path: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(dir_path);
        if !dir.exists() {
            return Err(ConfigError::ValidationError(format!(
                "series_path '{dir_path}' does not exist"
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "series_path '{dir_path}' is not a directory"
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if path.is_file() && (ext == "yaml" || ext == "yml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!("Loading series config from: {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let file_config: Self = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
            })?;
            merged = merged.merge(file_config);
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config: SeriesConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, SeriesConfig::default());
        assert_eq!(config.max_buffered_length, DEFAULT_MAX_BUFFERED_LENGTH);
    }

    #[test]
    fn test_camel_case_and_loose_values() {
        let yaml = r#"
debounceTime: 500
blockTime: "2s"
changesOnly: "true"
changesRelogInterval: 60
changesMinDelta: "0.5"
ignoreZero: 1
storageType: Number
retentionSeconds: 86400
maxBufferedLength: "25"
writeNulls: on
"#;
        let config: SeriesConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.debounce_time, Duration::from_millis(500));
        assert_eq!(config.block_time, Duration::from_secs(2));
        assert!(config.changes_only);
        assert_eq!(config.changes_relog_interval, Duration::from_secs(60));
        assert_eq!(config.changes_min_delta, 0.5);
        assert!(config.ignore_zero);
        assert_eq!(config.storage_type, Some(StorageType::Number));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.max_buffered_length, 25);
        assert!(config.write_nulls);
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        for options in [
            serde_json::json!({"debounceTime": 1e30}),
            serde_json::json!({"blockTime": "1e30"}),
            serde_json::json!({"retentionSeconds": 1e25}),
        ] {
            assert!(serde_json::from_value::<SeriesConfig>(options).is_err());
        }
    }

    #[test]
    fn test_validate_thresholds() {
        let config = SeriesConfig {
            ignore_below_number: Some(10.0),
            ignore_above_number: Some(5.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SeriesConfig {
            changes_min_delta: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let set: SeriesSet = serde_yaml::from_str(
            r#"
series:
  - id: a.b
  - id: a.b
    changesOnly: true
"#,
        )
        .unwrap();
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate series id"));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("one.yaml"),
            "series:\n  - id: s1\n    debounceTime: 100\n",
        )
        .unwrap();
        fs::write(dir.path().join("two.yml"), "series:\n  - id: s2\n").unwrap();
        fs::write(dir.path().join("ignored.txt"), "series: nope").unwrap();

        let set = SeriesSet::load_from_dir(dir.path().to_str().unwrap()).unwrap();
        let ids: Vec<&str> = set.series.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(set.series[0].config.debounce_time, Duration::from_millis(100));
    }

    #[test]
    fn test_load_from_missing_dir() {
        assert!(SeriesSet::load_from_dir("/definitely/not/here").is_err());
    }
}
