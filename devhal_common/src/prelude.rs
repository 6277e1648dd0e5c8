//! Prelude module for common re-exports.
//!
//! ```rust
//! use devhal_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::hal::config::{DriverSpec, HalConfig, IoSettings, StorageSettings, StoreConfig};

// ─── Driver contract ────────────────────────────────────────────────
pub use crate::hal::driver::{Driver, HalError};
pub use crate::hal::events::HalEvent;
pub use crate::hal::fingerprint::{
    SerialFingerprint, StorageFingerprint, UsbFingerprint, WakeLockFingerprint,
};
pub use crate::hal::types::{
    ConnectMethod, ConnectOptions, ConnectionInfo, ConnectionState, DetectionStatus,
    DeviceFilter, DirEntry, DriverDescriptor, DriverKind, EntryKind, ReadOutput, ReadRequest,
    WakeLockAction, WakeLockStatus, WriteInput, WriteOutcome, WriteRequest,
};
