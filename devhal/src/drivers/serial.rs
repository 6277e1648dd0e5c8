//! Serial port driver.
//!
//! Fingerprint: USB vendor/product ids of the adapter (or the port id for
//! non-USB ports) plus the selected baud rate. Silent restoration reopens
//! the matching granted port at the saved baud rate.

use crate::connection::{DriverContext, DriverCore, DriverIo};
use crate::orchestrator::Reacquire;
use crate::stream::{BoxedStream, StreamHandle};
use async_trait::async_trait;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::fingerprint::SerialFingerprint;
use devhal_common::hal::types::{
    ConnectOptions, DeviceFilter, DriverKind, ReadOutput, ReadRequest, WriteOutcome, WriteRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serial port as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Platform port identifier (device path)
    pub id: String,
    /// USB vendor id of the adapter
    pub vendor_id: Option<u16>,
    /// USB product id of the adapter
    pub product_id: Option<u16>,
    /// Product description, if known
    pub description: Option<String>,
}

impl SerialPortInfo {
    /// Label shown in choosers and connection info.
    pub fn label(&self) -> String {
        match (self.vendor_id, self.product_id, &self.description) {
            (Some(v), Some(p), Some(d)) => format!("{} [{v:04x}:{p:04x}] {d}", self.id),
            (Some(v), Some(p), None) => format!("{} [{v:04x}:{p:04x}]", self.id),
            _ => self.id.clone(),
        }
    }

    /// Check against a chooser filter.
    pub fn passes(&self, filters: &[DeviceFilter]) -> bool {
        filters.is_empty()
            || filters
                .iter()
                .any(|f| f.matches(self.vendor_id, self.product_id))
    }
}

/// Host serial capability.
#[async_trait]
pub trait SerialPlatform: Send + Sync {
    /// Whether serial access exists on this host.
    fn is_supported(&self) -> bool;

    /// Ports already granted, without prompting.
    async fn granted_ports(&self) -> Result<Vec<SerialPortInfo>, HalError>;

    /// Whether a granted port is still usable without a prompt.
    async fn has_permission(&self, port: &SerialPortInfo) -> bool;

    /// Ask the user to pick a port.
    async fn request_port(&self, filters: &[DeviceFilter]) -> Result<SerialPortInfo, HalError>;

    /// Open a port.
    async fn open(&self, port: &SerialPortInfo, baud_rate: u32) -> Result<BoxedStream, HalError>;
}

/// Serial backend for [`DriverCore`].
pub struct SerialBackend {
    platform: Arc<dyn SerialPlatform>,
}

/// Serial driver.
pub type SerialDriver = DriverCore<SerialBackend>;

impl SerialBackend {
    /// Wrap a platform.
    pub fn new(platform: Arc<dyn SerialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Reacquire for SerialBackend {
    type Resource = SerialPortInfo;
    type Handle = StreamHandle;
    type Fingerprint = SerialFingerprint;

    fn kind(&self) -> DriverKind {
        DriverKind::Serial
    }

    async fn detect(&self) -> bool {
        self.platform.is_supported()
    }

    async fn authorized(&self) -> Result<Vec<SerialPortInfo>, HalError> {
        self.platform.granted_ports().await
    }

    fn matches(&self, port: &SerialPortInfo, fingerprint: &SerialFingerprint) -> bool {
        fingerprint.matches(&port.id, port.vendor_id, port.product_id)
    }

    async fn verify(&self, port: &SerialPortInfo) -> bool {
        self.platform.has_permission(port).await
    }

    async fn request(&self, options: &ConnectOptions) -> Result<SerialPortInfo, HalError> {
        self.platform.request_port(&options.device_filters()).await
    }

    fn fingerprint(&self, port: &SerialPortInfo, options: &ConnectOptions) -> SerialFingerprint {
        SerialFingerprint {
            vendor_id: port.vendor_id,
            product_id: port.product_id,
            port_id: port.id.clone(),
            baud_rate: options.baud_rate(),
        }
    }

    async fn open(
        &self,
        port: &SerialPortInfo,
        fingerprint: &SerialFingerprint,
    ) -> Result<StreamHandle, HalError> {
        let stream = self.platform.open(port, fingerprint.baud_rate).await?;
        Ok(StreamHandle::new(stream))
    }

    async fn close(&self, handle: &StreamHandle) -> Result<(), HalError> {
        handle.close().await
    }

    fn describe(
        &self,
        port: &SerialPortInfo,
        fingerprint: &SerialFingerprint,
    ) -> (String, BTreeMap<String, String>) {
        let mut details = BTreeMap::new();
        details.insert("baudRate".to_string(), fingerprint.baud_rate.to_string());
        if let (Some(v), Some(p)) = (port.vendor_id, port.product_id) {
            details.insert("vendorId".to_string(), format!("0x{v:04x}"));
            details.insert("productId".to_string(), format!("0x{p:04x}"));
        }
        (port.label(), details)
    }
}

#[async_trait]
impl DriverIo for SerialBackend {
    type Write = Vec<u8>;

    async fn read(
        &self,
        handle: &StreamHandle,
        request: &ReadRequest,
        io: &IoSettings,
    ) -> Result<ReadOutput, HalError> {
        if request.entry.is_some() {
            return Err(HalError::InvalidDataFormat(
                "serial reads take no entry name".to_string(),
            ));
        }
        handle.read_chunk(io.read_buffer).await.map(ReadOutput::Bytes)
    }

    fn prepare_write(&self, request: WriteRequest) -> Result<Vec<u8>, HalError> {
        match request {
            WriteRequest::Data(input) => input.into_bytes(),
            _ => Err(HalError::InvalidDataFormat(
                "serial writes take a data payload".to_string(),
            )),
        }
    }

    async fn write(
        &self,
        handle: &StreamHandle,
        data: Vec<u8>,
    ) -> Result<(WriteOutcome, Option<SerialFingerprint>), HalError> {
        let bytes = handle.write_all(&data).await?;
        Ok((WriteOutcome::Written { bytes }, None))
    }
}

/// Factory function to create a serial driver instance.
pub fn create_driver(
    name: &str,
    platform: Arc<dyn SerialPlatform>,
    defaults: ConnectOptions,
    ctx: &DriverContext,
) -> Arc<dyn Driver> {
    Arc::new(SerialDriver::new(
        name,
        SerialBackend::new(platform),
        defaults,
        ctx,
    ))
}
