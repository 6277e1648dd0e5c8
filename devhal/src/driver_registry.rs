//! Driver registry.
//!
//! Owns the driver instances of one HAL by name. Constructed at startup,
//! populated via `register()`, and owned by `HalCore`. No global state.

use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::types::DriverDescriptor;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of driver instances, keyed by unique name.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name.
    ///
    /// # Errors
    /// Returns `HalError::DuplicateDriver` if the name is taken; the
    /// existing driver is kept.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Result<(), HalError> {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            return Err(HalError::DuplicateDriver(name));
        }
        debug!("Registered {} driver '{}'", driver.kind(), name);
        self.drivers.insert(name, driver);
        Ok(())
    }

    /// Get a driver by name.
    ///
    /// # Errors
    /// Returns `HalError::UnknownDriver` if no driver with the given name is registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>, HalError> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| HalError::UnknownDriver(name.to_string()))
    }

    /// All drivers, ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &Arc<dyn Driver>> {
        self.drivers.values()
    }

    /// All registered driver names, ordered.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Descriptor snapshot of every driver.
    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        self.list().map(|d| d.descriptor()).collect()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
