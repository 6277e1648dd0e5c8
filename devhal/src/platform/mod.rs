//! Host platform backends.
//!
//! Drivers talk to the host through one platform trait per kind (defined
//! next to each driver). This module provides the implementations:
//!
//! - [`simulation`] - Programmable in-memory devices for development and tests
//! - [`fs_storage`] - Directory-backed storage
//! - [`native_serial`] - Real serial ports (feature `native-serial`)
//! - [`unsupported`] - Placeholder for capabilities the host lacks
//! - [`console`] - Interactive chooser on stdin/stderr

pub mod console;
pub mod fs_storage;
#[cfg(feature = "native-serial")]
pub mod native_serial;
pub mod simulation;
pub mod unsupported;

use crate::drivers::serial::SerialPlatform;
use crate::drivers::storage::StoragePlatform;
use crate::drivers::usb::UsbPlatform;
use crate::drivers::wakelock::WakeLockPlatform;
use async_trait::async_trait;
use devhal_common::hal::config::HalConfig;
use devhal_common::hal::driver::HalError;
use std::sync::Arc;
use tracing::info;

/// User's answer to an acquisition prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Index into the offered choices
    Selected(usize),
    /// Dismissed without choosing
    Cancelled,
    /// Explicitly refused access
    Denied,
}

/// Interactive chooser used by interactive acquisition.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Present `choices` under `title` and wait for the user.
    async fn choose(&self, title: &str, choices: &[String]) -> PromptOutcome;
}

/// Prompt for one of `items`.
///
/// # Errors
/// `NoDeviceAvailable` if `items` is empty or the prompt was dismissed,
/// `PermissionDenied` if the user refused.
pub async fn prompt_choice<T>(
    prompter: &dyn Prompter,
    title: &str,
    mut items: Vec<T>,
    label: impl Fn(&T) -> String,
) -> Result<T, HalError> {
    if items.is_empty() {
        return Err(HalError::NoDeviceAvailable(format!("{title}: nothing to choose from")));
    }

    let labels: Vec<String> = items.iter().map(&label).collect();
    match prompter.choose(title, &labels).await {
        PromptOutcome::Selected(i) if i < items.len() => Ok(items.swap_remove(i)),
        PromptOutcome::Selected(_) | PromptOutcome::Cancelled => Err(
            HalError::NoDeviceAvailable(format!("{title}: nothing selected")),
        ),
        PromptOutcome::Denied => Err(HalError::PermissionDenied(format!(
            "{title}: access refused"
        ))),
    }
}

/// One backend per driver kind.
#[derive(Clone)]
pub struct Platforms {
    /// Serial backend
    pub serial: Arc<dyn SerialPlatform>,
    /// USB backend
    pub usb: Arc<dyn UsbPlatform>,
    /// Storage backend
    pub storage: Arc<dyn StoragePlatform>,
    /// Wake-lock backend
    pub wake_lock: Arc<dyn WakeLockPlatform>,
}

impl Platforms {
    /// Backends for the real host.
    ///
    /// USB and wake-lock have no native backend and report unsupported.
    pub fn native(config: &HalConfig, prompter: Arc<dyn Prompter>) -> Self {
        let storage = Arc::new(fs_storage::FsStoragePlatform::new(
            config.storage.roots.clone(),
            Arc::clone(&prompter),
        ));

        #[cfg(feature = "native-serial")]
        let serial: Arc<dyn SerialPlatform> =
            Arc::new(native_serial::NativeSerialPlatform::new(prompter));
        #[cfg(not(feature = "native-serial"))]
        let serial: Arc<dyn SerialPlatform> = {
            drop(prompter);
            info!("Built without native-serial, serial driver unsupported");
            Arc::new(unsupported::Unsupported)
        };

        Self {
            serial,
            usb: Arc::new(unsupported::Unsupported),
            storage,
            wake_lock: Arc::new(unsupported::Unsupported),
        }
    }

    /// Simulated backends with one demo device per kind, already granted.
    pub fn simulated() -> Self {
        info!("Using simulated platforms");
        Self {
            serial: Arc::new(simulation::SimDevices::demo_serial()),
            usb: Arc::new(simulation::SimDevices::demo_usb()),
            storage: Arc::new(simulation::SimStorage::demo()),
            wake_lock: Arc::new(simulation::SimWakeLock::new()),
        }
    }
}
