//! Server configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/crud/config.toml` by default. Every field is optional; CLI
//! flags and their environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crud_lifecycle::ListenerKind;
use crud_lifecycle::tracing::{LogConfig, LogFormat};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};

/// Port the product server has always listened on.
pub const DEFAULT_TCP_ADDRESS: &str = "8181";

/// Configuration for the crud server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener settings.
    pub listener: ListenerSettings,

    /// Shutdown settings.
    pub shutdown: ShutdownSettings,

    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Where the server accepts connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Transport to bind.
    pub kind: ListenerKind,

    /// TCP address, either `"<port>"` or `"<host>:<port>"`.
    pub tcp_address: String,

    /// Unix socket path.
    pub unix_path: PathBuf,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            kind: ListenerKind::Tcp,
            tcp_address: DEFAULT_TCP_ADDRESS.to_string(),
            unix_path: default_socket_path(),
        }
    }
}

/// Shutdown settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long in-flight work gets after the shutdown decision.
    pub grace_period_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
        }
    }
}

impl ShutdownSettings {
    /// Returns the grace period as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Include file and line in log lines.
    pub include_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
        }
    }
}

impl LoggingSettings {
    /// Builds the tracing configuration. `debug` forces the debug level.
    pub fn to_log_config(&self, debug: bool) -> AppResult<LogConfig> {
        let level = if debug {
            Level::DEBUG
        } else {
            self.level
                .parse::<Level>()
                .map_err(|_| AppError::config(format!("invalid log level '{}'", self.level)))?
        };

        let mut config = LogConfig::default()
            .with_level(level)
            .with_format(self.format);
        config.include_location = self.include_location || debug;
        Ok(config)
    }
}

impl AppConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> AppResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::config(format!("failed to parse config: {}", e)))
    }

    /// Loads the file named by `--config` (or the default) and applies CLI
    /// overrides.
    pub fn resolve(cli: &Cli) -> AppResult<Self> {
        let mut config = match cli.config {
            Some(ref path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_cli(cli);
        Ok(config)
    }

    /// Applies flag and environment overrides from the command line.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(kind) = cli.listener {
            self.listener.kind = kind;
        }
        if let Some(ref address) = cli.address {
            self.listener.tcp_address = address.clone();
        }
        if let Some(ref path) = cli.socket_path {
            self.listener.unix_path = path.clone();
        }
        if let Some(format) = cli.log_format {
            self.logging.format = format;
        }
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("failed to serialize config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crud")
            .join("config.toml")
    }
}

/// Returns the default Unix socket path.
///
/// Uses `$XDG_RUNTIME_DIR/crud.sock` if available,
/// otherwise falls back to `/tmp/crud-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("crud.sock")
    } else {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/crud-{}.sock", uid))
    }
}
