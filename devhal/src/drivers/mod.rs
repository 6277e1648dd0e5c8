//! Driver implementations.
//!
//! - [`serial`] - Serial ports
//! - [`usb`] - USB devices
//! - [`storage`] - Writable local directories
//! - [`wakelock`] - Screen wake-lock
//!
//! Every driver is a [`DriverCore`](crate::connection::DriverCore) over a
//! kind-specific backend, which in turn talks to the host through the
//! platform trait defined in its module.
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/` with a platform trait and a
//!    backend implementing `Reacquire` and `DriverIo`
//! 2. Add a `DriverKind` variant and a fingerprint type in `devhal_common`
//! 3. Dispatch the kind in [`create_driver`]

pub mod serial;
pub mod storage;
pub mod usb;
pub mod wakelock;

use crate::connection::DriverContext;
use crate::driver_registry::DriverRegistry;
use crate::platform::Platforms;
use devhal_common::hal::config::DriverSpec;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::types::DriverKind;
use std::sync::Arc;

/// Create the driver a spec describes. Performs no I/O.
pub fn create_driver(
    spec: &DriverSpec,
    platforms: &Platforms,
    ctx: &DriverContext,
) -> Arc<dyn Driver> {
    let options = spec.options.clone();
    match spec.kind {
        DriverKind::Serial => {
            serial::create_driver(&spec.name, Arc::clone(&platforms.serial), options, ctx)
        }
        DriverKind::Usb => usb::create_driver(&spec.name, Arc::clone(&platforms.usb), options, ctx),
        DriverKind::Storage => {
            storage::create_driver(&spec.name, Arc::clone(&platforms.storage), options, ctx)
        }
        DriverKind::WakeLock => {
            wakelock::create_driver(&spec.name, Arc::clone(&platforms.wake_lock), options, ctx)
        }
    }
}

/// Create and register one driver per spec.
///
/// # Errors
/// `DuplicateDriver` if two specs share a name; drivers registered before
/// the duplicate stay registered.
pub fn register_all_drivers(
    registry: &mut DriverRegistry,
    specs: &[DriverSpec],
    platforms: &Platforms,
    ctx: &DriverContext,
) -> Result<(), HalError> {
    for spec in specs {
        registry.register(create_driver(spec, platforms, ctx))?;
    }
    Ok(())
}
