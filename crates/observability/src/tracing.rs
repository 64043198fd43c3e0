//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`); the output format from
//! `TRADEERP_LOG_FORMAT` (`json` by default, or `pretty` for local runs).

use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservabilityError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl core::str::FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(ObservabilityError::Invalid {
                key: "TRADEERP_LOG_FORMAT",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, e.g. `info,tradeerp_infra=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObservabilityError> {
        let filter = lookup("RUST_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = match lookup("TRADEERP_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };
        Ok(Self { filter, format })
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize tracing/logging from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops). An unreadable
/// `TRADEERP_LOG_FORMAT` falls back to JSON.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_default();
    init_with(&config);
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    if installed.is_err() {
        return false;
    }
    ::tracing::debug!(format = ?config.format, filter = %config.filter, "tracing initialized");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_to_json_at_info() {
        let config = ObservabilityConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ObservabilityConfig::default());
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn reads_filter_and_format() {
        let config = ObservabilityConfig::from_lookup(lookup(&[
            ("RUST_LOG", "warn,tradeerp_infra=debug"),
            ("TRADEERP_LOG_FORMAT", "Pretty"),
        ]))
        .unwrap();
        assert_eq!(config.filter, "warn,tradeerp_infra=debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_unknown_format() {
        let err = ObservabilityConfig::from_lookup(lookup(&[("TRADEERP_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert_eq!(
            err,
            ObservabilityError::Invalid {
                key: "TRADEERP_LOG_FORMAT",
                value: "xml".to_string(),
            }
        );
    }

    #[test]
    fn second_init_is_a_no_op() {
        let config = ObservabilityConfig {
            filter: "not a valid [directive".to_string(),
            format: LogFormat::Pretty,
        };
        // Whichever call ran first owns the global subscriber.
        init_with(&config);
        assert!(!init_with(&config));
        init();
    }
}
