//! Tracing subscriber setup for crud binaries.
//!
//! ```ignore
//! use crud_lifecycle::tracing::{init_tracing, LogConfig, LogFormat};
//!
//! init_tracing(LogConfig::default().with_format(LogFormat::Json))?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt as layer_fmt, prelude::*};

/// Crates whose events pass the default filter.
const LOG_TARGETS: &[&str] = &["crud", "crud_lifecycle"];

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to set global subscriber.
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Failed to parse env filter directive.
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
    /// One JSON object per line, for log shippers.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Compact => f.write_str("compact"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{other}' (expected 'pretty', 'compact' or 'json')"
            )),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level applied to crud crates when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Whether to include file/line information.
    pub include_location: bool,
    /// Custom filter directive; overrides both `level` and `RUST_LOG`.
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LogConfig {
    /// Set the default log level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set a custom env filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive used when neither `env_filter` nor `RUST_LOG` is set.
    pub fn default_directive(&self) -> String {
        LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={}", self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Installs the global subscriber. Call once, at startup.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set or the custom
/// filter directive does not parse.
pub fn init_tracing(config: LogConfig) -> Result<(), TracingError> {
    let env_filter = match config.env_filter {
        Some(ref filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.default_directive())),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Pretty => {
            let layer = layer_fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
        LogFormat::Compact => {
            let layer = layer_fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
        LogFormat::Json => {
            let layer = layer_fmt::layer()
                .json()
                .with_file(config.include_location)
                .with_line_number(config.include_location);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(!config.include_location);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn default_directive_covers_crud_crates() {
        let config = LogConfig::default().with_level(Level::DEBUG);
        assert_eq!(config.default_directive(), "crud=DEBUG,crud_lifecycle=DEBUG");
    }

    #[test]
    fn builder_methods() {
        let config = LogConfig::default()
            .with_format(LogFormat::Json)
            .with_env_filter("crud_lifecycle=trace");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.env_filter.as_deref(), Some("crud_lifecycle=trace"));
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
