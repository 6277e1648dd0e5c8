//! HAL Core struct.
//!
//! `HalCore` is the main entry point for host code. It builds the metadata
//! store, the event publisher and the driver registry from a `HalConfig`
//! and a set of platform backends, forgets remembered devices on request,
//! and disconnects every driver on shutdown.

use crate::connection::DriverContext;
use crate::driver_registry::DriverRegistry;
use crate::drivers::register_all_drivers;
use crate::events::EventPublisher;
use crate::platform::Platforms;
use crate::store::{FileMetadataStore, MetadataStore};
use devhal_common::hal::config::HalConfig;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::events::HalEvent;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// HAL Core owns the registry and the services shared by its drivers.
pub struct HalCore {
    /// HAL configuration
    config: HalConfig,
    /// Registered drivers
    registry: DriverRegistry,
    /// Notification sink shared by all drivers
    events: EventPublisher,
    /// Fingerprint persistence shared by all drivers
    store: Arc<dyn MetadataStore>,
}

impl HalCore {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `HalError::ConfigError` if the file is missing, malformed or invalid.
    pub fn load_config(config_path: &Path) -> Result<HalConfig, HalError> {
        info!("Loading configuration from {:?}", config_path);

        let config = HalConfig::load_validated(config_path)
            .map_err(|e| HalError::ConfigError(format!("{}: {}", config_path.display(), e)))?;

        info!(
            "Loaded config: {} driver(s), store dir {:?}",
            config.effective_drivers().len(),
            config.store.dir
        );
        Ok(config)
    }

    /// Create a HAL whose fingerprints live under the configured store
    /// directory, resolved against `config_dir` when relative.
    ///
    /// # Errors
    /// Returns error if configuration validation fails or driver names collide.
    pub fn new(config: HalConfig, config_dir: &Path, platforms: Platforms) -> Result<Self, HalError> {
        let store = FileMetadataStore::new(resolve_path(config_dir, &config.store.dir));
        info!("Metadata store at {}", store.root().display());
        Self::with_store(config, Arc::new(store), platforms)
    }

    /// Create a HAL over an explicit metadata store.
    ///
    /// # Errors
    /// Returns error if configuration validation fails or driver names collide.
    pub fn with_store(
        config: HalConfig,
        store: Arc<dyn MetadataStore>,
        platforms: Platforms,
    ) -> Result<Self, HalError> {
        config.validate()?;

        let events = EventPublisher::new();
        let ctx = DriverContext {
            store: Arc::clone(&store),
            events: events.clone(),
            io: config.io,
        };

        let mut registry = DriverRegistry::new();
        register_all_drivers(&mut registry, &config.effective_drivers(), &platforms, &ctx)?;

        info!(
            "HalCore created with drivers: {}",
            registry.names().join(", ")
        );

        Ok(Self {
            config,
            registry,
            events,
            store,
        })
    }

    /// Driver registry.
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Look up a driver by name.
    ///
    /// # Errors
    /// Returns `HalError::UnknownDriver` if no such driver is registered.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn Driver>, HalError> {
        self.registry.get(name)
    }

    /// Receive `driver-connected` / `driver-disconnected` events.
    pub fn subscribe(&self) -> broadcast::Receiver<HalEvent> {
        self.events.subscribe()
    }

    /// Active configuration.
    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Disconnect `name` and delete its fingerprint, so the next connect
    /// asks the user again instead of restoring.
    ///
    /// # Errors
    /// `HalError::UnknownDriver` for an unregistered name,
    /// `HalError::PersistenceUnavailable` if the record cannot be deleted.
    pub async fn forget(&self, name: &str) -> Result<(), HalError> {
        let driver = self.registry.get(name)?;
        driver.disconnect().await;
        self.store.remove(driver.kind().as_str(), name).await?;
        info!("{}: remembered device forgotten", name);
        Ok(())
    }

    /// Disconnect every driver. Never fails.
    pub async fn shutdown(&self) {
        info!("Shutdown requested");
        for driver in self.registry.list() {
            driver.disconnect().await;
        }
        info!("All drivers disconnected");
    }
}

/// Resolve a possibly relative path against a base directory.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
