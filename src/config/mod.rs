//! Configuration module for the historian.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (url, concurrency mode)
//! - Resource pool and engine tuning
//! - Per-series ingestion policy, with an optional include directory

mod app;
mod loose;
mod series;
mod validation;

pub use app::{AppConfig, DatabaseConfig, EngineConfig, ServerConfig};
pub use series::{SeriesConfig, SeriesEntry, SeriesSet};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_BUCKET_LIMIT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_COUNT, DEFAULT_SWEEP_INTERVAL};
pub use series::DEFAULT_MAX_BUFFERED_LENGTH;

pub(crate) use loose::{boolean, optional_count, optional_number};
