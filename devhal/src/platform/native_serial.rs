//! Native serial ports through `tokio-serial`.
//!
//! On a native host every enumerated port counts as authorized; the
//! permission check is whether the port can be opened read-write by this
//! process right now.

use super::{Prompter, prompt_choice};
use crate::drivers::serial::{SerialPlatform, SerialPortInfo};
use crate::stream::BoxedStream;
use async_trait::async_trait;
use devhal_common::hal::driver::HalError;
use devhal_common::hal::types::DeviceFilter;
use std::sync::Arc;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::debug;

/// Serial platform over the host's serial devices.
pub struct NativeSerialPlatform {
    prompter: Arc<dyn Prompter>,
}

impl NativeSerialPlatform {
    /// Prompt through `prompter` during interactive acquisition.
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self { prompter }
    }

    async fn enumerate(&self) -> Result<Vec<SerialPortInfo>, HalError> {
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| HalError::CommunicationError(format!("port enumeration failed: {e}")))?
            .map_err(|e| HalError::CommunicationError(format!("port enumeration failed: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => SerialPortInfo {
                    id: p.port_name,
                    vendor_id: Some(usb.vid),
                    product_id: Some(usb.pid),
                    description: usb.product,
                },
                _ => SerialPortInfo {
                    id: p.port_name,
                    vendor_id: None,
                    product_id: None,
                    description: None,
                },
            })
            .collect())
    }
}

#[async_trait]
impl SerialPlatform for NativeSerialPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    async fn granted_ports(&self) -> Result<Vec<SerialPortInfo>, HalError> {
        self.enumerate().await
    }

    async fn has_permission(&self, port: &SerialPortInfo) -> bool {
        match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&port.id)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Permission check on {} failed: {}", port.id, e);
                false
            }
        }
    }

    async fn request_port(&self, filters: &[DeviceFilter]) -> Result<SerialPortInfo, HalError> {
        let candidates: Vec<SerialPortInfo> = self
            .enumerate()
            .await?
            .into_iter()
            .filter(|p| p.passes(filters))
            .collect();
        prompt_choice(
            self.prompter.as_ref(),
            "Select a serial port",
            candidates,
            SerialPortInfo::label,
        )
        .await
    }

    async fn open(&self, port: &SerialPortInfo, baud_rate: u32) -> Result<BoxedStream, HalError> {
        let stream = tokio_serial::new(port.id.as_str(), baud_rate)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::NoDevice => {
                    HalError::NoDeviceAvailable(format!("{}: {e}", port.id))
                }
                _ => HalError::CommunicationError(format!("{}: {e}", port.id)),
            })?;
        Ok(Box::new(stream))
    }
}
