//! HAL configuration types.
//!
//! This module contains configuration types loaded from `devhal.toml`:
//! - `HalConfig` - Main configuration
//! - `StoreConfig` - Metadata store location
//! - `IoSettings` - Read deadline and buffer defaults
//! - `StorageSettings` - Directories offered by the filesystem backend
//! - `DriverSpec` - One registered driver instance

use crate::config::{ConfigError, ConfigLoader, SharedConfig};
use crate::hal::consts::{DEFAULT_READ_BUFFER, DEFAULT_READ_TIMEOUT_MS, DEFAULT_STORE_DIR};
use crate::hal::driver::HalError;
use crate::hal::types::{ConnectOptions, DriverKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default function for store dir
fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

/// Default function for read_timeout_ms
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

/// Default function for read_buffer
fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

/// Main configuration loaded from `devhal.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HalConfig {
    /// Logging and service identity.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Metadata store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// I/O defaults.
    #[serde(default)]
    pub io: IoSettings,

    /// Filesystem storage backend.
    #[serde(default)]
    pub storage: StorageSettings,

    /// Drivers to register. Empty means one driver per kind.
    #[serde(default)]
    pub drivers: Vec<DriverSpec>,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory (relative to the config file's directory).
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

/// I/O defaults applied by stream drivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IoSettings {
    /// Read deadline in milliseconds when a request carries none.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Maximum bytes returned by one read.
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
}

impl IoSettings {
    /// Default read deadline.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Filesystem storage backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directories the user may grant to the storage driver.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

/// One driver instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSpec {
    /// Unique registry name.
    pub name: String,

    /// Driver kind.
    pub kind: DriverKind,

    /// Default `connect` options; call-site options override them.
    #[serde(default)]
    pub options: ConnectOptions,
}

impl DriverSpec {
    /// Spec with no default options.
    pub fn new(name: &str, kind: DriverKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            options: ConnectOptions::default(),
        }
    }
}

impl HalConfig {
    /// Load and validate a configuration file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.shared.validate()?;
        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// Validate the HAL configuration.
    ///
    /// # Validation Rules
    /// 1. `io.read_timeout_ms` > 0
    /// 2. `io.read_buffer` > 0
    /// 3. Driver names non-empty and unique
    pub fn validate(&self) -> Result<(), HalError> {
        if self.io.read_timeout_ms == 0 {
            return Err(HalError::ConfigError(
                "read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.io.read_buffer == 0 {
            return Err(HalError::ConfigError(
                "read_buffer must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for spec in &self.drivers {
            if spec.name.is_empty() {
                return Err(HalError::ConfigError(
                    "driver name cannot be empty".to_string(),
                ));
            }
            if !names.insert(&spec.name) {
                return Err(HalError::ConfigError(format!(
                    "Duplicate driver name: {}",
                    spec.name
                )));
            }
        }

        Ok(())
    }

    /// Drivers to register: the configured list, or one per kind.
    pub fn effective_drivers(&self) -> Vec<DriverSpec> {
        if self.drivers.is_empty() {
            DriverKind::ALL
                .iter()
                .map(|kind| DriverSpec::new(kind.as_str(), *kind))
                .collect()
        } else {
            self.drivers.clone()
        }
    }
}
