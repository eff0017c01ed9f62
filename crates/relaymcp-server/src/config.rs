//! Server and logging configuration.
//!
//! Configuration is optional: every field has a default, so an empty file (or
//! no file at all) yields a working server. Files are TOML:
//!
//! ```toml
//! name = "inventory"
//! version = "1.4.0"
//! request_timeout_secs = 15
//!
//! [tasks]
//! default_ttl_ms = 600000
//! max_page_size = 25
//!
//! [logging]
//! level = "debug"
//! timestamps = false
//! ```

use std::path::{Path, PathBuf};

use relaymcp_core::logging::Level;
use relaymcp_transport::DEFAULT_MAX_MESSAGE_SIZE;
use serde::Deserialize;

use crate::tasks::{DEFAULT_PAGE_SIZE, TaskDefaults};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "RELAYMCP_CONFIG";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML or has wrong types.
    Parse(toml::de::Error),
    /// A value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read {}: {source}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "Invalid configuration: {e}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name reported during `initialize`.
    pub name: String,
    /// Server version reported during `initialize`.
    pub version: String,
    /// Instructions returned to the client.
    pub instructions: Option<String>,
    /// Per-request timeout in seconds; 0 disables it.
    pub request_timeout_secs: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Task manager defaults.
    pub tasks: TaskConfig,
    /// Logging settings.
    pub logging: LoggingSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instructions: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tasks: TaskConfig::default(),
            logging: LoggingSection::default(),
        }
    }
}

/// `[tasks]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// TTL for tasks created without one.
    pub default_ttl_ms: Option<u64>,
    /// Suggested polling interval.
    pub default_poll_interval_ms: Option<u64>,
    /// Page size for `tasks/list`.
    pub max_page_size: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: None,
            default_poll_interval_ms: Some(1_000),
            max_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TaskConfig {
    /// Converts to manager defaults.
    #[must_use]
    pub fn to_defaults(&self) -> TaskDefaults {
        TaskDefaults {
            ttl_ms: self.default_ttl_ms,
            poll_interval_ms: self.default_poll_interval_ms,
            page_size: self.max_page_size,
        }
    }
}

/// `[logging]` section. Unset fields fall back to the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Level name (error, warn, info, debug, trace).
    pub level: Option<String>,
    /// Show timestamps.
    pub timestamps: Option<bool>,
    /// Show targets.
    pub targets: Option<bool>,
}

impl ServerConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML or out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads configuration from the usual places.
    ///
    /// Reads the file named by `RELAYMCP_CONFIG` if set, otherwise
    /// `<config dir>/relaymcp/config.toml` if it exists, otherwise returns
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a file was found but is unreadable or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/relaymcp/config.toml`, if the platform has a config dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relaymcp").join("config.toml"))
    }

    /// Logging settings: the `[logging]` section over the environment.
    #[must_use]
    pub fn logging_config(&self) -> LoggingConfig {
        let mut config = LoggingConfig::from_env();
        if let Some(level) = self.logging.level.as_deref().and_then(parse_level) {
            config.level = level;
        }
        if let Some(timestamps) = self.logging.timestamps {
            config.timestamps = timestamps;
        }
        if let Some(targets) = self.logging.targets {
            config.targets = targets;
        }
        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_owned()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be positive".to_owned(),
            ));
        }
        if self.tasks.max_page_size == 0 {
            return Err(ConfigError::Invalid(
                "tasks.max_page_size must be positive".to_owned(),
            ));
        }
        if let Some(level) = &self.logging.level {
            if parse_level(level).is_none() {
                return Err(ConfigError::Invalid(format!("unknown log level: {level}")));
            }
        }
        Ok(())
    }
}

/// Logging configuration for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Minimum log level (default: INFO).
    pub level: Level,
    /// Show timestamps in logs (default: true).
    pub timestamps: bool,
    /// Show module targets in logs (default: true).
    pub targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            timestamps: true,
            targets: true,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from environment variables.
    ///
    /// Respects:
    /// - `RELAYMCP_LOG`: Log level (error, warn, info, debug, trace)
    /// - `RELAYMCP_LOG_TIMESTAMPS`: Show timestamps (0/false to disable)
    /// - `RELAYMCP_LOG_TARGETS`: Show targets (0/false to disable)
    #[must_use]
    pub fn from_env() -> Self {
        let level = std::env::var("RELAYMCP_LOG")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::Info);

        let timestamps = std::env::var("RELAYMCP_LOG_TIMESTAMPS")
            .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let targets = std::env::var("RELAYMCP_LOG_TARGETS")
            .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            level,
            timestamps,
            targets,
        }
    }

    /// Installs an `env_logger` backend writing to stderr.
    ///
    /// `RUST_LOG` still refines per-target levels. Returns false if a logger
    /// was already installed.
    pub fn init(&self) -> bool {
        let mut builder = env_logger::Builder::new();
        builder
            .target(env_logger::Target::Stderr)
            .filter_level(self.level.to_level_filter())
            .format_target(self.targets);
        if !self.timestamps {
            builder.format_timestamp(None);
        }
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        builder.try_init().is_ok()
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::Error),
        "warn" | "warning" => Some(Level::Warn),
        "info" => Some(Level::Info),
        "debug" => Some(Level::Debug),
        "trace" => Some(Level::Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.tasks.max_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn sections_override_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            name = "inventory"
            version = "1.4.0"
            request_timeout_secs = 0

            [tasks]
            default_ttl_ms = 600000
            max_page_size = 25

            [logging]
            level = "debug"
            timestamps = false
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "inventory");
        assert_eq!(config.request_timeout_secs, 0);
        let defaults = config.tasks.to_defaults();
        assert_eq!(defaults.ttl_ms, Some(600_000));
        assert_eq!(defaults.page_size, 25);
        assert_eq!(defaults.poll_interval_ms, Some(1_000));

        let logging = config.logging_config();
        assert_eq!(logging.level, Level::Debug);
        assert!(!logging.timestamps);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ServerConfig::from_toml_str("max_message_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("[logging]\nlevel = \"loud\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = ServerConfig::from_file("/nonexistent/relaymcp.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relaymcp.toml"));
    }

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!(parse_level("WARNING"), Some(Level::Warn));
        assert_eq!(parse_level("Trace"), Some(Level::Trace));
        assert_eq!(parse_level("verbose"), None);
    }
}
