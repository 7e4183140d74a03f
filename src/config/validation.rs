//! Config errors and the text helpers shared by the loaders.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Errors raised while loading historian or series configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file or series directory could not be read.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A value parsed but is not usable (empty url, bad thresholds, ...).
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a human duration as written for series options.
///
/// Bare numbers are handled by the option deserializers, which know their
/// unit; this only takes suffixed text such as `500ms`, `30s` or `1h30m`.
///
/// # Examples
///
/// ```
/// use historian::config::parse_duration;
///
/// assert_eq!(parse_duration("500ms").unwrap().as_millis(), 500);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
}

/// Substitute `${VAR}` and `${VAR:-default}` from the process environment.
///
/// Used on the database url so deployments can relocate the data file.
/// Unset variables without a default expand to nothing.
pub fn expand_env_vars(input: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder pattern is valid")
    });

    placeholder
        .replace_all(input, |caps: &Captures| {
            let fallback = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| fallback.to_string())
        })
        .into_owned()
}
