//! HAL driver trait and error types.
//!
//! This module defines:
//! - `Driver` trait - Uniform contract every peripheral driver implements
//! - `HalError` enum - Error taxonomy for registry, connect, I/O and store

use crate::hal::types::{
    ConnectOptions, ConnectionInfo, ConnectionState, DriverDescriptor, DriverKind, ReadOutput,
    ReadRequest, WriteOutcome, WriteRequest,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Error types for HAL operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// A driver with this name is already registered
    #[error("Driver already registered: {0}")]
    DuplicateDriver(String),

    /// No driver with this name is registered
    #[error("Driver not found: {0}")]
    UnknownDriver(String),

    /// The user declined the acquisition prompt
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No resource exists, none was selected, or the host lacks the feature
    #[error("No device available: {0}")]
    NoDeviceAvailable(String),

    /// A connect is already in flight for this driver
    #[error("Connect already in progress: {0}")]
    AlreadyInProgress(String),

    /// Operation requires the Connected state
    #[error("Driver not connected: {0}")]
    NotConnected(String),

    /// Another read is still pending on this driver
    #[error("Reader busy: {0}")]
    ReaderBusy(String),

    /// No data arrived before the read deadline
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The underlying stream ended; the driver was disconnected
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Write payload is not text, a byte sequence or raw bytes
    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    /// Wake-lock action other than acquire/release
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Metadata store could not be read or written
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Device open or I/O failure
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Trait defining the interface for peripheral drivers.
///
/// Host code reaches drivers through the registry as `Arc<dyn Driver>`.
/// All operations take `&self`: every driver owns its mutable state and
/// guards it internally, so operations on different drivers never contend.
///
/// # Lifecycle
///
/// ```text
/// Uninitialized ─► Detecting ─┬─► Restoring ───────────┬─► Connected ─► Disconnected
///                             └─► AwaitingUserSelection ┘       │
///        (any non-terminal state) ─────────────► Error ◄────────┘
/// ```
///
/// # Contract
///
/// | Operation | Precondition | Failure modes |
/// |-----------|--------------|---------------|
/// | `detect()` | none | none (returns false) |
/// | `connect()` | not connecting | `PermissionDenied`, `NoDeviceAvailable`, `AlreadyInProgress` |
/// | `disconnect()` | none | none (best effort) |
/// | `read()` | Connected | `NotConnected`, `ReaderBusy`, `ReadTimeout`, `StreamClosed` |
/// | `write()` | Connected | `NotConnected`, `InvalidDataFormat`, `UnknownAction` |
#[async_trait]
pub trait Driver: Send + Sync {
    /// Returns the driver's unique registry name (e.g. "serial", "usb-scale").
    fn name(&self) -> &str;

    /// Returns the peripheral class this driver adapts.
    fn kind(&self) -> DriverKind;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Snapshot of identity, state and handle ownership.
    fn descriptor(&self) -> DriverDescriptor;

    /// Probe whether the host offers the underlying capability.
    ///
    /// Pure and idempotent: never changes the connection state.
    async fn detect(&self) -> bool;

    /// Connect, restoring a previously granted resource silently when
    /// possible and prompting the user otherwise.
    ///
    /// Calling `connect` while Connected returns the current info without
    /// touching the device.
    async fn connect(&self, options: &ConnectOptions) -> Result<ConnectionInfo, HalError>;

    /// Release the handle and return to Disconnected.
    ///
    /// Never fails; errors while closing are logged.
    async fn disconnect(&self);

    /// Read from the connected resource.
    async fn read(&self, request: ReadRequest) -> Result<ReadOutput, HalError>;

    /// Write to the connected resource.
    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, HalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::types::DetectionStatus;
    use std::sync::Mutex;

    struct TestDriver {
        state: Mutex<ConnectionState>,
    }

    #[async_trait]
    impl Driver for TestDriver {
        fn name(&self) -> &str {
            "test"
        }

        fn kind(&self) -> DriverKind {
            DriverKind::Serial
        }

        fn version(&self) -> &'static str {
            "0.1.0"
        }

        fn state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }

        fn descriptor(&self) -> DriverDescriptor {
            DriverDescriptor::new(self.name(), self.kind(), self.version())
        }

        async fn detect(&self) -> bool {
            true
        }

        async fn connect(&self, _options: &ConnectOptions) -> Result<ConnectionInfo, HalError> {
            *self.state.lock().unwrap() = ConnectionState::Error;
            Err(HalError::NoDeviceAvailable("test".to_string()))
        }

        async fn disconnect(&self) {
            *self.state.lock().unwrap() = ConnectionState::Disconnected;
        }

        async fn read(&self, _request: ReadRequest) -> Result<ReadOutput, HalError> {
            Err(HalError::NotConnected(self.name().to_string()))
        }

        async fn write(&self, _request: WriteRequest) -> Result<WriteOutcome, HalError> {
            Err(HalError::NotConnected(self.name().to_string()))
        }
    }

    #[test]
    fn test_hal_error_display() {
        let err = HalError::DuplicateDriver("serial".to_string());
        assert!(err.to_string().contains("serial"));

        let err = HalError::ReadTimeout(Duration::from_millis(100));
        assert!(err.to_string().contains("100ms"));
    }

    #[tokio::test]
    async fn test_driver_is_object_safe() {
        let driver: Box<dyn Driver> = Box::new(TestDriver {
            state: Mutex::new(ConnectionState::Uninitialized),
        });
        assert!(driver.detect().await);
        assert_eq!(driver.descriptor().detection, DetectionStatus::Unknown);
        driver.disconnect().await;
        assert_eq!(driver.state(), ConnectionState::Disconnected);
    }
}
