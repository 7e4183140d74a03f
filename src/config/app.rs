//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::series::{SeriesEntry, SeriesSet};
use super::validation::{ConfigError, expand_env_vars};
use crate::pool::PoolConfig;

// =============================================================================
// Constants
// =============================================================================

/// Default connection ceiling for concurrent backends.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Default engine command channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default periodic flush sweep (10 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Default minimum time between retention deletes of one series (1 hour).
pub const DEFAULT_RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Default upper bound on aggregation buckets per query.
pub const DEFAULT_BUCKET_LIMIT: usize = 2000;

/// Default bucket count when a query gives neither `step` nor `count`.
pub const DEFAULT_COUNT: usize = 500;

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_retention_check_interval() -> Duration {
    DEFAULT_RETENTION_CHECK_INTERVAL
}

fn default_bucket_limit() -> usize {
    DEFAULT_BUCKET_LIMIT
}

fn default_count() -> usize {
    DEFAULT_COUNT
}

fn default_pacing_every() -> usize {
    10
}

fn default_pacing_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_instance_id() -> String {
    "historian.0".to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (default: "sqlite:historian.db"). Supports `${VAR:-default}`.
    pub url: String,

    /// Logical database name passed to the dialect (default: "historian").
    #[serde(default = "default_database_name")]
    pub database: String,

    /// Run statements concurrently on pooled connections instead of through
    /// the serial queue (default: false).
    #[serde(default)]
    pub multi_requests: bool,

    /// Concurrent statement ceiling with `multi_requests` (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Pause after each serialized statement (default: 0).
    #[serde(default, with = "humantime_serde")]
    pub request_interval: Duration,
}

fn default_database_name() -> String {
    "historian".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:historian.db".to_string(),
            database: default_database_name(),
            multi_requests: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            request_interval: Duration::ZERO,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Write/query engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Command channel capacity (default: 10000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Flush every series this often (default: 10m).
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// On shutdown, pause after every this many series (default: 10).
    #[serde(default = "default_pacing_every")]
    pub shutdown_pacing_every: usize,

    /// Length of the shutdown pause (default: 50ms).
    #[serde(default = "default_pacing_delay", with = "humantime_serde")]
    pub shutdown_pacing_delay: Duration,

    /// Maximum buckets per aggregation (default: 2000).
    #[serde(default = "default_bucket_limit")]
    pub bucket_limit: usize,

    /// Buckets per query without `step`/`count` (default: 500).
    #[serde(default = "default_count")]
    pub default_count: usize,

    /// Minimum time between retention deletes of one series (default: 1h).
    #[serde(default = "default_retention_check_interval", with = "humantime_serde")]
    pub retention_check_interval: Duration,

    /// Source tag of samples the engine writes itself (default: "historian.0").
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_pacing_every: default_pacing_every(),
            shutdown_pacing_delay: default_pacing_delay(),
            bucket_limit: DEFAULT_BUCKET_LIMIT,
            default_count: DEFAULT_COUNT,
            retention_check_interval: DEFAULT_RETENTION_CHECK_INTERVAL,
            instance_id: default_instance_id(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Resource pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Series enabled at startup.
    #[serde(default)]
    pub series: Vec<SeriesEntry>,

    /// Path to a directory with additional series config files.
    #[serde(default)]
    pub series_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.database.url = expand_env_vars(&config.database.url);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database url cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database max_connections must be positive".to_string(),
            ));
        }

        if self.pool.max_active == 0 {
            return Err(ConfigError::ValidationError(
                "pool max_active must be positive".to_string(),
            ));
        }

        if self.pool.min_idle > self.pool.max_idle {
            return Err(ConfigError::ValidationError(format!(
                "pool min_idle ({}) exceeds max_idle ({})",
                self.pool.min_idle, self.pool.max_idle
            )));
        }

        if self.engine.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "engine channel_capacity must be positive".to_string(),
            ));
        }

        if self.engine.bucket_limit == 0 || self.engine.default_count == 0 {
            return Err(ConfigError::ValidationError(
                "engine bucket_limit and default_count must be positive".to_string(),
            ));
        }

        if self.engine.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "engine sweep_interval must be positive".to_string(),
            ));
        }

        SeriesSet {
            series: self.series.clone(),
        }
        .validate()
    }

    /// Load configuration including the `series_path` directory.
    ///
    /// If `series_path` is specified, scans the directory for YAML files
    /// and appends their series entries.
    pub fn load_with_series_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(ref series_dir) = config.series_path {
            let additional = SeriesSet::load_from_dir(series_dir)?;
            config.series.extend(additional.series);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite:historian.db");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.multi_requests);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "not-an-ip".to_string(),
                port: 8080,
            },
            ..Default::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
server:
  bind: 127.0.0.1
  port: 9000
database:
  url: "sqlite:${HISTORIAN_TEST_NO_SUCH_VAR:-fallback.db}"
  multi_requests: true
pool:
  max_active: 2
  when_exhausted: fail
engine:
  sweep_interval: 1m
series:
  - id: boiler.temp
    debounceTime: 250
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url, "sqlite:fallback.db");
        assert!(config.database.multi_requests);
        assert_eq!(config.pool.max_active, 2);
        assert_eq!(config.engine.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.series.len(), 1);
        assert_eq!(config.series[0].config.debounce_time, Duration::from_millis(250));
    }

    #[test]
    fn test_load_with_series_path() {
        let dir = tempdir().unwrap();
        let series_dir = dir.path().join("series.d");
        fs::create_dir(&series_dir).unwrap();
        fs::write(series_dir.join("extra.yaml"), "series:\n  - id: extra\n").unwrap();

        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                "series:\n  - id: main\nseries_path: {}\n",
                series_dir.display()
            ),
        )
        .unwrap();

        let config = AppConfig::load_with_series_path(&path).unwrap();
        let ids: Vec<&str> = config.series.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "extra"]);
    }

    #[test]
    fn test_series_path_duplicate_is_rejected() {
        let dir = tempdir().unwrap();
        let series_dir = dir.path().join("series.d");
        fs::create_dir(&series_dir).unwrap();
        fs::write(series_dir.join("dup.yaml"), "series:\n  - id: main\n").unwrap();

        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                "series:\n  - id: main\nseries_path: {}\n",
                series_dir.display()
            ),
        )
        .unwrap();

        assert!(AppConfig::load_with_series_path(&path).is_err());
    }
}
