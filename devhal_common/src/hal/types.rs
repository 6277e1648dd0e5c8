//! HAL data model.
//!
//! Types exchanged between host code and drivers: driver identity and
//! state, connection results, acquisition options and the read/write
//! request and response shapes.

use crate::hal::consts::{DEFAULT_BAUD_RATE, OPT_BAUD_RATE, OPT_FILTERS};
use crate::hal::driver::HalError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ─── Identity ───────────────────────────────────────────────────────

/// Peripheral class adapted by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Serial port
    Serial,
    /// Raw USB device
    Usb,
    /// Writable local directory
    Storage,
    /// Screen wake-lock
    #[serde(rename = "wakelock")]
    WakeLock,
}

impl DriverKind {
    /// All kinds, in declaration order.
    pub const ALL: [DriverKind; 4] = [Self::Serial, Self::Usb, Self::Storage, Self::WakeLock];

    /// Stable lowercase tag, also used as the metadata store namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Usb => "usb",
            Self::Storage => "storage",
            Self::WakeLock => "wakelock",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "usb" => Ok(Self::Usb),
            "storage" => Ok(Self::Storage),
            "wakelock" | "wake-lock" => Ok(Self::WakeLock),
            other => Err(HalError::ConfigError(format!("unknown driver kind '{other}'"))),
        }
    }
}

/// Result of the last capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    /// Not probed yet
    #[default]
    Unknown,
    /// Host offers the capability
    Supported,
    /// Host lacks the capability
    Unsupported,
}

impl From<bool> for DetectionStatus {
    fn from(supported: bool) -> Self {
        if supported {
            Self::Supported
        } else {
            Self::Unsupported
        }
    }
}

// ─── Connection state machine ───────────────────────────────────────

/// Connection state of a driver.
///
/// Every driver occupies exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, never connected
    #[default]
    Uninitialized,
    /// Probing host capability
    Detecting,
    /// Attempting silent restoration from a persisted fingerprint
    Restoring,
    /// Waiting for the user to select or grant a resource
    AwaitingUserSelection,
    /// Handle open, I/O allowed
    Connected,
    /// Handle released, ready for reuse
    Disconnected,
    /// Last connect failed; handle released
    Error,
}

impl ConnectionState {
    /// Check whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Uninitialized | Disconnected | Error, Detecting) => true,
            (Detecting, Restoring | AwaitingUserSelection) => true,
            (Restoring, AwaitingUserSelection | Connected) => true,
            (AwaitingUserSelection, Connected) => true,
            (Connected | Error, Disconnected) => true,
            (Detecting | Restoring | AwaitingUserSelection | Connected, Error) => true,
            _ => false,
        }
    }

    /// True while a connect attempt owns the driver.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Detecting | Self::Restoring | Self::AwaitingUserSelection
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Detecting => "detecting",
            Self::Restoring => "restoring",
            Self::AwaitingUserSelection => "awaiting_user_selection",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of a driver's identity and state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Unique registry name
    pub name: String,
    /// Peripheral class
    pub kind: DriverKind,
    /// Driver version
    pub version: String,
    /// Result of the last capability probe made by `connect`
    pub detection: DetectionStatus,
    /// Current connection state
    pub state: ConnectionState,
    /// Whether the driver currently owns an open handle
    pub has_handle: bool,
    /// Whether a read is outstanding
    pub reader_active: bool,
    /// Message of the error that moved the driver to `Error`
    pub last_error: Option<String>,
}

impl DriverDescriptor {
    /// Descriptor of a freshly registered driver.
    pub fn new(name: &str, kind: DriverKind, version: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            version: version.to_string(),
            detection: DetectionStatus::Unknown,
            state: ConnectionState::Uninitialized,
            has_handle: false,
            reader_active: false,
            last_error: None,
        }
    }
}

// ─── Connect ────────────────────────────────────────────────────────

/// How a connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMethod {
    /// Silent restoration from a persisted fingerprint
    Restored,
    /// User selected or granted the resource
    Interactive,
}

impl fmt::Display for ConnectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restored => f.write_str("restored"),
            Self::Interactive => f.write_str("interactive"),
        }
    }
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Driver name
    pub driver: String,
    /// Driver kind
    pub kind: DriverKind,
    /// Restored or interactively acquired
    pub method: ConnectMethod,
    /// Human-readable identifier of the connected resource
    pub resource: String,
    /// Driver-specific parameters (e.g. `baudRate`)
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

/// Vendor/product filter narrowing the device chooser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
    /// USB vendor id, any if absent
    pub vendor_id: Option<u16>,
    /// USB product id, any if absent
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Check a device's identifiers against this filter.
    pub fn matches(&self, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
        let vendor_ok = self.vendor_id.is_none() || self.vendor_id == vendor_id;
        let product_ok = self.product_id.is_none() || self.product_id == product_id;
        vendor_ok && product_ok
    }
}

/// Option bag passed to `connect`.
///
/// Keys are driver-specific; unrecognized keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectOptions(Map<String, Value>);

impl ConnectOptions {
    /// Empty option bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Unsigned integer value for a key; other types read as absent.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Serial baud rate, `DEFAULT_BAUD_RATE` when absent or invalid.
    pub fn baud_rate(&self) -> u32 {
        self.get_u64(OPT_BAUD_RATE)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|&b| b > 0)
            .unwrap_or(DEFAULT_BAUD_RATE)
    }

    /// Device filters from the `filters` key. Malformed entries are skipped.
    pub fn device_filters(&self) -> Vec<DeviceFilter> {
        self.0
            .get(OPT_FILTERS)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Options with `overrides` layered on top of `self`.
    pub fn merged(&self, overrides: &ConnectOptions) -> ConnectOptions {
        let mut map = self.0.clone();
        for (k, v) in &overrides.0 {
            map.insert(k.clone(), v.clone());
        }
        Self(map)
    }

    /// True if no keys are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─── Read ───────────────────────────────────────────────────────────

/// Read request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Deadline for the read; driver default when absent
    pub timeout: Option<Duration>,
    /// Named entry to read (storage driver only)
    pub entry: Option<String>,
}

impl ReadRequest {
    /// Read with an explicit deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            entry: None,
        }
    }

    /// Read a named storage entry.
    pub fn entry(name: impl Into<String>) -> Self {
        Self {
            timeout: None,
            entry: Some(name.into()),
        }
    }
}

/// Kind of a storage directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Sub-directory
    Directory,
}

/// Storage directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// File or directory
    pub kind: EntryKind,
}

/// Wake-lock status reported by `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeLockStatus {
    /// A wake lock is currently held
    pub active: bool,
    /// Wake-lock kind (e.g. "screen")
    pub kind: String,
}

/// Result of a `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReadOutput {
    /// Bytes from a serial or USB stream, or a storage entry's content
    Bytes(Vec<u8>),
    /// Storage directory listing
    Entries(Vec<DirEntry>),
    /// Wake-lock status
    WakeLock(WakeLockStatus),
}

// ─── Write ──────────────────────────────────────────────────────────

/// Write payload before normalization to bytes.
///
/// `Value` carries dynamically typed host input: a JSON string is UTF-8
/// text and a JSON array of integers in `0..=255` is a byte sequence.
/// Any other value is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteInput {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Dynamically typed value
    Value(Value),
}

impl WriteInput {
    /// Normalize to the bytes that will be written.
    ///
    /// # Errors
    /// `InvalidDataFormat` for anything other than text, a byte sequence
    /// or raw bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>, HalError> {
        match self {
            Self::Text(s) => Ok(s.into_bytes()),
            Self::Bytes(b) => Ok(b),
            Self::Value(Value::String(s)) => Ok(s.into_bytes()),
            Self::Value(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| {
                            HalError::InvalidDataFormat(format!("{item} is not a byte value"))
                        })
                })
                .collect(),
            Self::Value(other) => Err(HalError::InvalidDataFormat(format!(
                "expected text, byte sequence or bytes, got {}",
                value_type_name(&other)
            ))),
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<&str> for WriteInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for WriteInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for WriteInput {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for WriteInput {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for WriteInput {
    fn from(b: &[u8; N]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<Value> for WriteInput {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Write request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Stream write (serial, USB)
    Data(WriteInput),
    /// Create or overwrite a named entry (storage)
    Entry {
        /// Entry name
        name: String,
        /// Entry content
        content: WriteInput,
    },
    /// Named action (wake-lock)
    Action(String),
}

impl WriteRequest {
    /// Stream write.
    pub fn data(input: impl Into<WriteInput>) -> Self {
        Self::Data(input.into())
    }

    /// Storage entry write.
    pub fn entry(name: impl Into<String>, content: impl Into<WriteInput>) -> Self {
        Self::Entry {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Wake-lock action.
    pub fn action(action: impl Into<String>) -> Self {
        Self::Action(action.into())
    }
}

/// Wake-lock actions accepted by `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeLockAction {
    /// Request the lock
    Acquire,
    /// Release the lock
    Release,
}

impl FromStr for WakeLockAction {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acquire" => Ok(Self::Acquire),
            "release" => Ok(Self::Release),
            other => Err(HalError::UnknownAction(other.to_string())),
        }
    }
}

/// Result of a `write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Bytes accepted by the device or written to the entry
    Written {
        /// Byte count
        bytes: usize,
    },
    /// Wake-lock status after the action
    WakeLock(WakeLockStatus),
}

impl WriteOutcome {
    /// Byte count for data writes.
    pub fn bytes_written(&self) -> Option<usize> {
        match self {
            Self::Written { bytes } => Some(*bytes),
            Self::WakeLock(_) => None,
        }
    }
}
