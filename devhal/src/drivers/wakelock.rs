//! Screen wake-lock driver.
//!
//! Connecting never prompts: the capability is either present or not.
//! The fingerprint records whether a lock was held, so a restarted host
//! re-acquires the lock during silent restoration only when it was active.
//! `write` takes the actions `acquire` and `release`.

use crate::connection::{DriverContext, DriverCore, DriverIo};
use crate::orchestrator::Reacquire;
use async_trait::async_trait;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::consts::WAKE_LOCK_KIND_SCREEN;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::fingerprint::WakeLockFingerprint;
use devhal_common::hal::types::{
    ConnectOptions, DriverKind, ReadOutput, ReadRequest, WakeLockAction, WakeLockStatus,
    WriteOutcome, WriteRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Held lock as returned by the platform.
#[async_trait]
pub trait WakeLockSentinel: Send + Sync {
    /// The platform dropped the lock (for example because the host was hidden).
    fn is_released(&self) -> bool;

    /// Give the lock back.
    async fn release(&self) -> Result<(), HalError>;
}

/// Host wake-lock capability.
#[async_trait]
pub trait WakeLockPlatform: Send + Sync {
    /// Whether wake-locks exist on this host.
    fn is_supported(&self) -> bool;

    /// Locks can only be requested while the host is visible.
    fn is_visible(&self) -> bool;

    /// Request a lock of `kind`.
    async fn request(&self, kind: &str) -> Result<Box<dyn WakeLockSentinel>, HalError>;
}

/// The lock kind a driver manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeLockTarget {
    /// Wake-lock kind
    pub kind: String,
}

/// Open wake-lock connection.
pub struct WakeLockHandle {
    kind: String,
    sentinel: Mutex<Option<Box<dyn WakeLockSentinel>>>,
}

impl WakeLockHandle {
    async fn status(&self) -> WakeLockStatus {
        let guard = self.sentinel.lock().await;
        WakeLockStatus {
            active: guard.as_ref().is_some_and(|s| !s.is_released()),
            kind: self.kind.clone(),
        }
    }
}

/// Wake-lock backend for [`DriverCore`].
pub struct WakeLockBackend {
    platform: Arc<dyn WakeLockPlatform>,
}

/// Wake-lock driver.
pub type WakeLockDriver = DriverCore<WakeLockBackend>;

impl WakeLockBackend {
    /// Wrap a platform.
    pub fn new(platform: Arc<dyn WakeLockPlatform>) -> Self {
        Self { platform }
    }

    fn target(&self) -> WakeLockTarget {
        WakeLockTarget {
            kind: WAKE_LOCK_KIND_SCREEN.to_string(),
        }
    }

    async fn acquire(&self, handle: &WakeLockHandle) -> Result<(), HalError> {
        let mut guard = handle.sentinel.lock().await;
        if guard.as_ref().is_some_and(|s| !s.is_released()) {
            debug!("Wake-lock already held");
            return Ok(());
        }
        if !self.platform.is_visible() {
            return Err(HalError::PermissionDenied(
                "wake-lock requires a visible host".to_string(),
            ));
        }
        *guard = Some(self.platform.request(&handle.kind).await?);
        Ok(())
    }

    async fn release(&self, handle: &WakeLockHandle) -> Result<(), HalError> {
        let sentinel = handle.sentinel.lock().await.take();
        match sentinel {
            Some(s) if !s.is_released() => s.release().await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Reacquire for WakeLockBackend {
    type Resource = WakeLockTarget;
    type Handle = WakeLockHandle;
    type Fingerprint = WakeLockFingerprint;

    fn kind(&self) -> DriverKind {
        DriverKind::WakeLock
    }

    async fn detect(&self) -> bool {
        self.platform.is_supported()
    }

    async fn authorized(&self) -> Result<Vec<WakeLockTarget>, HalError> {
        Ok(vec![self.target()])
    }

    fn matches(&self, target: &WakeLockTarget, fingerprint: &WakeLockFingerprint) -> bool {
        target.kind == fingerprint.kind
    }

    async fn verify(&self, _target: &WakeLockTarget) -> bool {
        self.platform.is_visible()
    }

    async fn request(&self, _options: &ConnectOptions) -> Result<WakeLockTarget, HalError> {
        Ok(self.target())
    }

    fn fingerprint(
        &self,
        target: &WakeLockTarget,
        _options: &ConnectOptions,
    ) -> WakeLockFingerprint {
        WakeLockFingerprint {
            was_active: false,
            kind: target.kind.clone(),
        }
    }

    async fn open(
        &self,
        target: &WakeLockTarget,
        fingerprint: &WakeLockFingerprint,
    ) -> Result<WakeLockHandle, HalError> {
        let handle = WakeLockHandle {
            kind: target.kind.clone(),
            sentinel: Mutex::new(None),
        };
        if fingerprint.was_active {
            self.acquire(&handle).await?;
        }
        Ok(handle)
    }

    async fn close(&self, handle: &WakeLockHandle) -> Result<(), HalError> {
        self.release(handle).await
    }

    fn describe(
        &self,
        target: &WakeLockTarget,
        fingerprint: &WakeLockFingerprint,
    ) -> (String, BTreeMap<String, String>) {
        let mut details = BTreeMap::new();
        details.insert("kind".to_string(), target.kind.clone());
        details.insert("reacquired".to_string(), fingerprint.was_active.to_string());
        (format!("{} wake-lock", target.kind), details)
    }
}

#[async_trait]
impl DriverIo for WakeLockBackend {
    type Write = WakeLockAction;

    async fn read(
        &self,
        handle: &WakeLockHandle,
        _request: &ReadRequest,
        _io: &IoSettings,
    ) -> Result<ReadOutput, HalError> {
        Ok(ReadOutput::WakeLock(handle.status().await))
    }

    fn prepare_write(&self, request: WriteRequest) -> Result<WakeLockAction, HalError> {
        match request {
            WriteRequest::Action(action) => action.parse(),
            _ => Err(HalError::InvalidDataFormat(
                "wake-lock writes take an action".to_string(),
            )),
        }
    }

    async fn write(
        &self,
        handle: &WakeLockHandle,
        action: WakeLockAction,
    ) -> Result<(WriteOutcome, Option<WakeLockFingerprint>), HalError> {
        match action {
            WakeLockAction::Acquire => self.acquire(handle).await?,
            WakeLockAction::Release => {
                if let Err(e) = self.release(handle).await {
                    warn!("Wake-lock release failed: {}", e);
                }
            }
        }

        let status = handle.status().await;
        let fingerprint = WakeLockFingerprint {
            was_active: status.active,
            kind: status.kind.clone(),
        };
        Ok((WriteOutcome::WakeLock(status), Some(fingerprint)))
    }
}

/// Factory function to create a wake-lock driver instance.
pub fn create_driver(
    name: &str,
    platform: Arc<dyn WakeLockPlatform>,
    defaults: ConnectOptions,
    ctx: &DriverContext,
) -> Arc<dyn Driver> {
    Arc::new(WakeLockDriver::new(
        name,
        WakeLockBackend::new(platform),
        defaults,
        ctx,
    ))
}
