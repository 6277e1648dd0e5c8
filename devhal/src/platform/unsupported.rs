//! Placeholder platform for capabilities the host lacks.
//!
//! Detection reports unsupported, so `connect` fails with
//! `NoDeviceAvailable` before any of the other operations is reached.

use crate::drivers::serial::{SerialPlatform, SerialPortInfo};
use crate::drivers::storage::{StorageDirectory, StoragePlatform, StorageRoot};
use crate::drivers::usb::{UsbDeviceInfo, UsbPlatform};
use crate::drivers::wakelock::{WakeLockPlatform, WakeLockSentinel};
use crate::stream::BoxedStream;
use async_trait::async_trait;
use devhal_common::hal::driver::HalError;
use devhal_common::hal::types::DeviceFilter;

/// Host without the capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

fn unavailable<T>(what: &str) -> Result<T, HalError> {
    Err(HalError::NoDeviceAvailable(format!(
        "{what} is not supported on this host"
    )))
}

#[async_trait]
impl SerialPlatform for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    async fn granted_ports(&self) -> Result<Vec<SerialPortInfo>, HalError> {
        Ok(Vec::new())
    }

    async fn has_permission(&self, _port: &SerialPortInfo) -> bool {
        false
    }

    async fn request_port(&self, _filters: &[DeviceFilter]) -> Result<SerialPortInfo, HalError> {
        unavailable("serial")
    }

    async fn open(&self, _port: &SerialPortInfo, _baud_rate: u32) -> Result<BoxedStream, HalError> {
        unavailable("serial")
    }
}

#[async_trait]
impl UsbPlatform for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    async fn granted_devices(&self) -> Result<Vec<UsbDeviceInfo>, HalError> {
        Ok(Vec::new())
    }

    async fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        false
    }

    async fn request_device(&self, _filters: &[DeviceFilter]) -> Result<UsbDeviceInfo, HalError> {
        unavailable("usb")
    }

    async fn open(&self, _device: &UsbDeviceInfo, _interface: u8) -> Result<BoxedStream, HalError> {
        unavailable("usb")
    }
}

#[async_trait]
impl StoragePlatform for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    async fn granted_roots(&self) -> Result<Vec<StorageRoot>, HalError> {
        Ok(Vec::new())
    }

    async fn has_permission(&self, _root: &StorageRoot) -> bool {
        false
    }

    async fn request_root(&self) -> Result<StorageRoot, HalError> {
        unavailable("storage")
    }

    async fn open(&self, _root: &StorageRoot) -> Result<Box<dyn StorageDirectory>, HalError> {
        unavailable("storage")
    }
}

#[async_trait]
impl WakeLockPlatform for Unsupported {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_visible(&self) -> bool {
        false
    }

    async fn request(&self, _kind: &str) -> Result<Box<dyn WakeLockSentinel>, HalError> {
        unavailable("wake-lock")
    }
}
