//! Pool sizing and exhaustion policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Behaviour of `acquire` when `max_active` handles are already borrowed.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WhenExhausted {
    /// Create a new handle beyond `max_active`.
    Grow,
    /// Poll every `wait_interval` until a handle frees or `max_wait` elapses.
    #[default]
    Block,
    /// Fail immediately with `EXHAUSTED`.
    Fail,
}

fn default_max_idle() -> usize {
    10
}

fn default_max_active() -> usize {
    10
}

fn default_max_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_wait_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_eviction_run_length() -> usize {
    10
}

/// Resource pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Handles kept warm by the eviction runner (default: 0).
    #[serde(default)]
    pub min_idle: usize,

    /// Idle handles retained after return (default: 10).
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Concurrently borrowed handles (default: 10).
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Exhaustion policy (default: block).
    #[serde(default)]
    pub when_exhausted: WhenExhausted,

    /// Longest time a blocked borrower waits (default: 30s).
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    /// Poll period while blocked (default: 50ms).
    #[serde(default = "default_wait_interval", with = "humantime_serde")]
    pub wait_interval: Duration,

    /// Extra creation attempts after the first failure (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between creation attempts (default: 500ms).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Idle handles older than this are invalid. Unset disables the check.
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,

    /// Eviction sweep period. Unset disables the runner.
    #[serde(default, with = "humantime_serde")]
    pub eviction_run_interval: Option<Duration>,

    /// Idle handles inspected per sweep (default: 10).
    #[serde(default = "default_eviction_run_length")]
    pub eviction_run_length: usize,

    /// Eviction runner holds only a weak reference to the pool.
    #[serde(default)]
    pub unref_eviction_runner: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_idle: default_max_idle(),
            max_active: default_max_active(),
            when_exhausted: WhenExhausted::default(),
            max_wait: default_max_wait(),
            wait_interval: default_wait_interval(),
            max_retries: default_max_retries(),
            retry_interval: default_retry_interval(),
            max_age: None,
            eviction_run_interval: None,
            eviction_run_length: default_eviction_run_length(),
            unref_eviction_runner: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_when_exhausted_from_str() {
        assert_eq!(WhenExhausted::from_str("grow").unwrap(), WhenExhausted::Grow);
        assert_eq!(WhenExhausted::from_str("BLOCK").unwrap(), WhenExhausted::Block);
        assert_eq!(WhenExhausted::from_str("Fail").unwrap(), WhenExhausted::Fail);
        assert!(WhenExhausted::from_str("wait").is_err());
    }

    #[test]
    fn test_pool_config_yaml_defaults() {
        let config: PoolConfig = serde_yaml::from_str("max_active: 2\nmax_age: 5m\n").unwrap();
        assert_eq!(config.max_active, 2);
        assert_eq!(config.max_idle, 10);
        assert_eq!(config.max_age, Some(Duration::from_secs(300)));
        assert_eq!(config.eviction_run_interval, None);
        assert_eq!(config.when_exhausted, WhenExhausted::Block);
    }
}
