//! Configuration file loading.
//!
//! Any `Deserialize` type can be read from a TOML file through the blanket
//! [`ConfigLoader`] impl. [`SharedConfig`] carries the fields every devhal
//! process has: log verbosity and an instance name used in log output.
//!
//! ```rust,no_run
//! use devhal_common::config::ConfigLoader;
//! use devhal_common::hal::config::HalConfig;
//! use std::path::Path;
//!
//! let config = HalConfig::load(Path::new("/etc/devhal/devhal.toml"))?;
//! println!("{} driver(s)", config.effective_drivers().len());
//! # Ok::<(), devhal_common::config::ConfigError>(())
//! ```

use crate::hal::consts::HAL_SERVICE_NAME;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to produce a usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but is not valid TOML for the expected type.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Parsed, but the values are inconsistent.
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Log verbosity, written in lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every state transition and I/O chunk
    Trace,
    /// State transitions
    Debug,
    /// Connects, disconnects and startup
    #[default]
    Info,
    /// Suppressed errors
    Warn,
    /// Failures only
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

fn default_service_name() -> String {
    HAL_SERVICE_NAME.to_string()
}

/// `[shared]` table.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "kiosk-hal"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name shown in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// The service name must be a non-empty token without whitespace.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        if self.service_name.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "service_name {:?} contains whitespace",
                self.service_name
            )));
        }
        Ok(())
    }
}

/// Read a TOML document into `Self`.
pub trait ConfigLoader: Sized + DeserializeOwned {
    /// Parse TOML text.
    ///
    /// # Errors
    /// `ConfigError::ParseError` with the TOML diagnostic.
    fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Read and parse a file.
    ///
    /// # Errors
    /// `ConfigError::FileNotFound` if nothing exists at `path`,
    /// `ConfigError::ParseError` if it cannot be read or parsed.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::ParseError(format!("{}: {e}", path.display())),
        })?;
        Self::from_toml(&text)
    }
}

impl<T: DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::config::HalConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_shared_table_is_optional() {
        let config = HalConfig::from_toml("").unwrap();
        assert_eq!(config.shared, SharedConfig::default());
        assert_eq!(config.shared.service_name, HAL_SERVICE_NAME);

        let config = HalConfig::from_toml("[shared]\nlog_level = \"warn\"\n").unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Warn);
        assert_eq!(config.shared.service_name, HAL_SERVICE_NAME);
    }

    #[test]
    fn test_log_level_maps_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
        assert_eq!(tracing::Level::from(LogLevel::default()), tracing::Level::INFO);
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_service_name_rules() {
        for bad in ["", "   ", "front desk"] {
            let shared = SharedConfig {
                service_name: bad.to_string(),
                ..SharedConfig::default()
            };
            assert!(
                matches!(shared.validate(), Err(ConfigError::ValidationError(_))),
                "{bad:?} accepted"
            );
        }
        assert!(SharedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let path = Path::new("/nonexistent/devhal.toml");
        assert_eq!(
            HalConfig::load(path).unwrap_err(),
            ConfigError::FileNotFound(path.to_path_buf())
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "[shared]\nservice_name = \"kiosk-hal\"\n\n[io]\nread_buffer = 512\n"
        )
        .unwrap();
        file.flush().unwrap();

        let config = HalConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.service_name, "kiosk-hal");
        assert_eq!(config.io.read_buffer, 512);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[io\nread_buffer = ").unwrap();
        assert!(matches!(
            HalConfig::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
