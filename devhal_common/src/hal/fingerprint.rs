//! Persisted fingerprints.
//!
//! A fingerprint is the minimal data needed to find and reopen a previously
//! granted resource without prompting the user. One fingerprint is kept per
//! driver name; a successful interactive acquisition overwrites it.
//!
//! A fingerprint is only a hint. Drivers must re-verify permission on the
//! matched resource before using it.

use serde::{Deserialize, Serialize};

/// Serial port fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialFingerprint {
    /// USB vendor id of the adapter, if it is a USB serial port
    pub vendor_id: Option<u16>,
    /// USB product id of the adapter
    pub product_id: Option<u16>,
    /// Platform port identifier, used when the port has no USB ids
    pub port_id: String,
    /// Baud rate selected at acquisition
    pub baud_rate: u32,
}

impl SerialFingerprint {
    /// Check a port's identity against this fingerprint.
    ///
    /// Ports with USB ids match on vendor and product (the port path may
    /// change across replugs); other ports match on their identifier.
    pub fn matches(&self, port_id: &str, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
        match (self.vendor_id, self.product_id) {
            (Some(v), Some(p)) => vendor_id == Some(v) && product_id == Some(p),
            _ => self.port_id == port_id,
        }
    }
}

/// USB device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbFingerprint {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Serial number, narrows the match when several identical devices exist
    pub serial_number: Option<String>,
    /// Claimed interface number
    pub interface: u8,
}

impl UsbFingerprint {
    /// Check a device's identity against this fingerprint.
    pub fn matches(&self, vendor_id: u16, product_id: u16, serial_number: Option<&str>) -> bool {
        self.vendor_id == vendor_id
            && self.product_id == product_id
            && match &self.serial_number {
                Some(expected) => serial_number == Some(expected.as_str()),
                None => true,
            }
    }
}

/// Storage fingerprint: an opaque capability reference to a granted directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFingerprint {
    /// Platform capability token
    pub capability: String,
}

/// Wake-lock fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeLockFingerprint {
    /// A lock was held when the fingerprint was written
    pub was_active: bool,
    /// Wake-lock kind
    pub kind: String,
}
