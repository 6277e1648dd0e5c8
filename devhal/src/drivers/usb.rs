//! USB device driver.
//!
//! Fingerprint: vendor id, product id, optional serial number and the
//! claimed interface number. A device with a serial number only restores
//! to the same physical unit.

use crate::connection::{DriverContext, DriverCore, DriverIo};
use crate::orchestrator::Reacquire;
use crate::stream::{BoxedStream, StreamHandle};
use async_trait::async_trait;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::consts::OPT_INTERFACE;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::fingerprint::UsbFingerprint;
use devhal_common::hal::types::{
    ConnectOptions, DeviceFilter, DriverKind, ReadOutput, ReadRequest, WriteOutcome, WriteRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// USB device as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Platform device identifier (bus path)
    pub id: String,
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Serial number string descriptor
    pub serial_number: Option<String>,
    /// Product string descriptor
    pub product_name: Option<String>,
}

impl UsbDeviceInfo {
    /// Label shown in choosers and connection info.
    pub fn label(&self) -> String {
        let name = self.product_name.as_deref().unwrap_or("USB device");
        match &self.serial_number {
            Some(sn) => format!(
                "{name} [{:04x}:{:04x}] #{sn}",
                self.vendor_id, self.product_id
            ),
            None => format!("{name} [{:04x}:{:04x}]", self.vendor_id, self.product_id),
        }
    }

    /// Check against a chooser filter.
    pub fn passes(&self, filters: &[DeviceFilter]) -> bool {
        filters.is_empty()
            || filters
                .iter()
                .any(|f| f.matches(Some(self.vendor_id), Some(self.product_id)))
    }
}

/// Host USB capability.
#[async_trait]
pub trait UsbPlatform: Send + Sync {
    /// Whether USB access exists on this host.
    fn is_supported(&self) -> bool;

    /// Devices already granted, without prompting.
    async fn granted_devices(&self) -> Result<Vec<UsbDeviceInfo>, HalError>;

    /// Whether a granted device is still usable without a prompt.
    async fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Ask the user to pick a device.
    async fn request_device(&self, filters: &[DeviceFilter]) -> Result<UsbDeviceInfo, HalError>;

    /// Open a device and claim `interface`.
    async fn open(&self, device: &UsbDeviceInfo, interface: u8) -> Result<BoxedStream, HalError>;
}

/// USB backend for [`DriverCore`].
pub struct UsbBackend {
    platform: Arc<dyn UsbPlatform>,
}

/// USB driver.
pub type UsbDriver = DriverCore<UsbBackend>;

impl UsbBackend {
    /// Wrap a platform.
    pub fn new(platform: Arc<dyn UsbPlatform>) -> Self {
        Self { platform }
    }
}

fn interface_option(options: &ConnectOptions) -> u8 {
    options
        .get_u64(OPT_INTERFACE)
        .and_then(|n| u8::try_from(n).ok())
        .unwrap_or(0)
}

#[async_trait]
impl Reacquire for UsbBackend {
    type Resource = UsbDeviceInfo;
    type Handle = StreamHandle;
    type Fingerprint = UsbFingerprint;

    fn kind(&self) -> DriverKind {
        DriverKind::Usb
    }

    async fn detect(&self) -> bool {
        self.platform.is_supported()
    }

    async fn authorized(&self) -> Result<Vec<UsbDeviceInfo>, HalError> {
        self.platform.granted_devices().await
    }

    fn matches(&self, device: &UsbDeviceInfo, fingerprint: &UsbFingerprint) -> bool {
        fingerprint.matches(
            device.vendor_id,
            device.product_id,
            device.serial_number.as_deref(),
        )
    }

    async fn verify(&self, device: &UsbDeviceInfo) -> bool {
        self.platform.has_permission(device).await
    }

    async fn request(&self, options: &ConnectOptions) -> Result<UsbDeviceInfo, HalError> {
        self.platform
            .request_device(&options.device_filters())
            .await
    }

    fn fingerprint(&self, device: &UsbDeviceInfo, options: &ConnectOptions) -> UsbFingerprint {
        UsbFingerprint {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            serial_number: device.serial_number.clone(),
            interface: interface_option(options),
        }
    }

    async fn open(
        &self,
        device: &UsbDeviceInfo,
        fingerprint: &UsbFingerprint,
    ) -> Result<StreamHandle, HalError> {
        let stream = self.platform.open(device, fingerprint.interface).await?;
        Ok(StreamHandle::new(stream))
    }

    async fn close(&self, handle: &StreamHandle) -> Result<(), HalError> {
        handle.close().await
    }

    fn describe(
        &self,
        device: &UsbDeviceInfo,
        fingerprint: &UsbFingerprint,
    ) -> (String, BTreeMap<String, String>) {
        let mut details = BTreeMap::new();
        details.insert(
            "vendorId".to_string(),
            format!("0x{:04x}", device.vendor_id),
        );
        details.insert(
            "productId".to_string(),
            format!("0x{:04x}", device.product_id),
        );
        details.insert("interface".to_string(), fingerprint.interface.to_string());
        if let Some(sn) = &device.serial_number {
            details.insert("serialNumber".to_string(), sn.clone());
        }
        (device.label(), details)
    }
}

#[async_trait]
impl DriverIo for UsbBackend {
    type Write = Vec<u8>;

    async fn read(
        &self,
        handle: &StreamHandle,
        request: &ReadRequest,
        io: &IoSettings,
    ) -> Result<ReadOutput, HalError> {
        if request.entry.is_some() {
            return Err(HalError::InvalidDataFormat(
                "usb reads take no entry name".to_string(),
            ));
        }
        handle.read_chunk(io.read_buffer).await.map(ReadOutput::Bytes)
    }

    fn prepare_write(&self, request: WriteRequest) -> Result<Vec<u8>, HalError> {
        match request {
            WriteRequest::Data(input) => input.into_bytes(),
            _ => Err(HalError::InvalidDataFormat(
                "usb writes take a data payload".to_string(),
            )),
        }
    }

    async fn write(
        &self,
        handle: &StreamHandle,
        data: Vec<u8>,
    ) -> Result<(WriteOutcome, Option<UsbFingerprint>), HalError> {
        let bytes = handle.write_all(&data).await?;
        Ok((WriteOutcome::Written { bytes }, None))
    }
}

/// Factory function to create a USB driver instance.
pub fn create_driver(
    name: &str,
    platform: Arc<dyn UsbPlatform>,
    defaults: ConnectOptions,
    ctx: &DriverContext,
) -> Arc<dyn Driver> {
    Arc::new(UsbDriver::new(name, UsbBackend::new(platform), defaults, ctx))
}
