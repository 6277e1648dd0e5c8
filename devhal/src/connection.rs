//! Connection core shared by all drivers.
//!
//! [`DriverCore`] owns one driver's descriptor state and handle and
//! implements the `Driver` contract generically: the state machine,
//! connect exclusivity, the single reader slot, the timeout race and the
//! best-effort disconnect. A backend only supplies the reconnection leaves
//! ([`Reacquire`]) and the per-kind I/O ([`DriverIo`]).
//!
//! # Concurrency
//!
//! State lives behind a `parking_lot` mutex that is never held across an
//! await. `connect` and `read` claim atomic slots instead of waiting, so
//! contention surfaces as `AlreadyInProgress` / `ReaderBusy`. Each
//! connection carries a `CancellationToken`; `disconnect` cancels it so a
//! pending read or write returns promptly without being awaited.

use crate::events::EventPublisher;
use crate::orchestrator::{Reacquire, reconnect};
use crate::store::{MetadataStore, save_fingerprint};
use async_trait::async_trait;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::types::{
    ConnectOptions, ConnectionInfo, ConnectionState, DetectionStatus, DriverDescriptor,
    DriverKind, ReadOutput, ReadRequest, WriteOutcome, WriteRequest,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-kind I/O on an open handle.
#[async_trait]
pub trait DriverIo: Reacquire {
    /// Validated write, produced before any device access.
    type Write: Send;

    /// Perform one read. Called with the reader slot held; the caller
    /// enforces the deadline and cancellation.
    async fn read(
        &self,
        handle: &Self::Handle,
        request: &ReadRequest,
        io: &IoSettings,
    ) -> Result<ReadOutput, HalError>;

    /// Validate and normalize a write request without touching the device.
    fn prepare_write(&self, request: WriteRequest) -> Result<Self::Write, HalError>;

    /// Perform a prepared write. A returned fingerprint replaces the
    /// persisted one.
    async fn write(
        &self,
        handle: &Self::Handle,
        write: Self::Write,
    ) -> Result<(WriteOutcome, Option<Self::Fingerprint>), HalError>;
}

/// Live connection.
struct Session<H> {
    id: u64,
    handle: Arc<H>,
    info: ConnectionInfo,
    cancel: CancellationToken,
}

/// Mutable descriptor state.
struct Inner<H> {
    state: ConnectionState,
    detection: DetectionStatus,
    session: Option<Session<H>>,
    last_error: Option<String>,
}

/// Generic driver implementation over a backend `B`.
pub struct DriverCore<B: DriverIo> {
    name: String,
    version: &'static str,
    backend: B,
    store: Arc<dyn MetadataStore>,
    events: EventPublisher,
    defaults: ConnectOptions,
    io: IoSettings,
    inner: Mutex<Inner<B::Handle>>,
    connecting: AtomicBool,
    reading: AtomicBool,
    next_session: AtomicU64,
}

/// Shared services a driver needs besides its backend.
#[derive(Clone)]
pub struct DriverContext {
    /// Fingerprint persistence
    pub store: Arc<dyn MetadataStore>,
    /// Notification sink
    pub events: EventPublisher,
    /// I/O defaults
    pub io: IoSettings,
}

impl<B: DriverIo> DriverCore<B> {
    /// Create a driver in state Uninitialized. Performs no I/O.
    pub fn new(name: &str, backend: B, defaults: ConnectOptions, ctx: &DriverContext) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION"),
            backend,
            store: Arc::clone(&ctx.store),
            events: ctx.events.clone(),
            defaults,
            io: ctx.io,
            inner: Mutex::new(Inner {
                state: ConnectionState::Uninitialized,
                detection: DetectionStatus::Unknown,
                session: None,
                last_error: None,
            }),
            connecting: AtomicBool::new(false),
            reading: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        }
    }

    /// Apply a state transition. Illegal transitions are logged and ignored.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!("{}: illegal transition {} -> {}", self.name, current, next);
            return false;
        }
        inner.state = next;
        debug!("{}: {} -> {}", self.name, current, next);
        true
    }

    /// Record a connect failure and move to Error.
    fn fail(&self, error: HalError) -> HalError {
        self.transition(ConnectionState::Error);
        self.inner.lock().last_error = Some(error.to_string());
        warn!("{}: connect failed: {}", self.name, error);
        error
    }

    fn current_info(&self) -> Option<ConnectionInfo> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) => Some(session.info.clone()),
            _ => None,
        }
    }

    /// Handle, token and id of the live session.
    fn active(&self) -> Result<(u64, Arc<B::Handle>, CancellationToken), HalError> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(s)) => {
                Ok((s.id, Arc::clone(&s.handle), s.cancel.clone()))
            }
            _ => Err(HalError::NotConnected(self.name.clone())),
        }
    }

    /// Cancel, close and forget a session, then publish the disconnect.
    async fn release(&self, session: Session<B::Handle>, reason: &str) {
        session.cancel.cancel();
        if let Err(e) = self.backend.close(&session.handle).await {
            warn!("{}: error closing handle (ignored): {}", self.name, e);
        }
        self.transition(ConnectionState::Disconnected);
        info!("{}: disconnected ({})", self.name, reason);
        self.events.disconnected(&self.name);
    }

    /// Force-close session `id` after its stream ended.
    async fn close_session(&self, id: u64, reason: &str) {
        let session = {
            let mut inner = self.inner.lock();
            match &inner.session {
                Some(s) if s.id == id => inner.session.take(),
                _ => None,
            }
        };
        if let Some(session) = session {
            self.release(session, reason).await;
        }
    }

    /// Save a fingerprint, logging failures.
    async fn persist(&self, fingerprint: &B::Fingerprint) {
        let namespace = self.backend.kind().as_str();
        if let Err(e) =
            save_fingerprint(self.store.as_ref(), namespace, &self.name, fingerprint).await
        {
            warn!("{}: failed to persist fingerprint: {}", self.name, e);
        }
    }

    async fn do_connect(&self, options: &ConnectOptions) -> Result<ConnectionInfo, HalError> {
        // Refused while a disconnect is still closing the previous handle.
        if !self.transition(ConnectionState::Detecting) {
            return Err(HalError::AlreadyInProgress(self.name.clone()));
        }
        let supported = self.backend.detect().await;
        self.inner.lock().detection = supported.into();
        if !supported {
            return Err(self.fail(HalError::NoDeviceAvailable(format!(
                "{} is not supported on this host",
                self.backend.kind()
            ))));
        }

        let options = self.defaults.merged(options);
        let reconnected = match reconnect(
            &self.backend,
            self.store.as_ref(),
            &self.name,
            &options,
            |stage| {
                self.transition(stage);
            },
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };

        let info = ConnectionInfo {
            driver: self.name.clone(),
            kind: self.backend.kind(),
            method: reconnected.method,
            resource: reconnected.resource,
            details: reconnected.details,
        };

        let handle = Arc::new(reconnected.handle);
        let installed = {
            let mut inner = self.inner.lock();
            let current = inner.state;
            if current.can_transition_to(ConnectionState::Connected) {
                inner.state = ConnectionState::Connected;
                inner.session = Some(Session {
                    id: self.next_session.fetch_add(1, Ordering::Relaxed),
                    handle: Arc::clone(&handle),
                    info: info.clone(),
                    cancel: CancellationToken::new(),
                });
                inner.last_error = None;
                debug!("{}: {} -> {}", self.name, current, ConnectionState::Connected);
                true
            } else {
                warn!(
                    "{}: illegal transition {} -> {}",
                    self.name,
                    current,
                    ConnectionState::Connected
                );
                false
            }
        };
        if !installed {
            if let Err(e) = self.backend.close(&handle).await {
                warn!("{}: error closing handle (ignored): {}", self.name, e);
            }
            return Err(self.fail(HalError::CommunicationError(
                "driver state changed during connect".to_string(),
            )));
        }

        info!(
            "{}: connected to {} ({})",
            self.name, info.resource, info.method
        );
        self.events.connected(&self.name, info.method);
        Ok(info)
    }
}

/// Exclusive connect slot. Releasing it mid-connect (the connect future
/// was dropped) moves the driver to Error so the next attempt can start.
struct ConnectSlot<'a, B: DriverIo> {
    core: &'a DriverCore<B>,
}

impl<'a, B: DriverIo> ConnectSlot<'a, B> {
    fn claim(core: &'a DriverCore<B>) -> Option<Self> {
        core.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { core })
    }
}

impl<B: DriverIo> Drop for ConnectSlot<'_, B> {
    fn drop(&mut self) {
        let abandoned = {
            let mut inner = self.core.inner.lock();
            if inner.state.is_connecting() {
                inner.state = ConnectionState::Error;
                inner.last_error = Some("connect abandoned".to_string());
                true
            } else {
                false
            }
        };
        if abandoned {
            warn!("{}: connect abandoned before completion", self.core.name);
        }
        self.core.connecting.store(false, Ordering::Release);
    }
}

/// Single reader slot.
struct ReadSlot<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReadSlot<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ReadSlot<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Race `fut` against a deadline and a cancellation token.
///
/// Whichever completes first wins; `fut` is dropped otherwise, which
/// cancels the underlying I/O cooperatively instead of leaving it running.
pub async fn race_deadline<T, F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, HalError>
where
    F: Future<Output = Result<T, HalError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HalError::NotConnected("cancelled by disconnect".to_string())),
        result = fut => result,
        _ = tokio::time::sleep(timeout) => Err(HalError::ReadTimeout(timeout)),
    }
}

#[async_trait]
impl<B: DriverIo> Driver for DriverCore<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        self.backend.kind()
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn descriptor(&self) -> DriverDescriptor {
        let inner = self.inner.lock();
        DriverDescriptor {
            name: self.name.clone(),
            kind: self.backend.kind(),
            version: self.version.to_string(),
            detection: inner.detection,
            state: inner.state,
            has_handle: inner.session.is_some(),
            reader_active: self.reading.load(Ordering::Acquire),
            last_error: inner.last_error.clone(),
        }
    }

    async fn detect(&self) -> bool {
        self.backend.detect().await
    }

    async fn connect(&self, options: &ConnectOptions) -> Result<ConnectionInfo, HalError> {
        if let Some(info) = self.current_info() {
            debug!("{}: already connected", self.name);
            return Ok(info);
        }

        let Some(_slot) = ConnectSlot::claim(self) else {
            return Err(HalError::AlreadyInProgress(self.name.clone()));
        };

        // A concurrent connect may have finished between the check and the claim.
        if let Some(info) = self.current_info() {
            return Ok(info);
        }

        self.do_connect(options).await
    }

    async fn disconnect(&self) {
        let session = {
            let mut inner = self.inner.lock();
            match (inner.state, inner.session.is_some()) {
                (ConnectionState::Connected, true) => inner.session.take(),
                (ConnectionState::Error, _) => {
                    inner.state = ConnectionState::Disconnected;
                    debug!("{}: error -> disconnected", self.name);
                    return;
                }
                (ConnectionState::Connected, false) => {
                    debug!("{}: disconnect already in progress", self.name);
                    return;
                }
                (state, _) if state.is_connecting() => {
                    debug!("{}: connect in flight, disconnect ignored", self.name);
                    return;
                }
                _ => {
                    debug!("{}: not connected, nothing to release", self.name);
                    return;
                }
            }
        };

        if let Some(session) = session {
            self.release(session, "requested").await;
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadOutput, HalError> {
        let (id, handle, cancel) = self.active()?;
        let Some(_slot) = ReadSlot::claim(&self.reading) else {
            return Err(HalError::ReaderBusy(self.name.clone()));
        };

        let timeout = request.timeout.unwrap_or_else(|| self.io.read_timeout());
        let result = race_deadline(
            self.backend.read(&handle, &request, &self.io),
            timeout,
            &cancel,
        )
        .await;

        match result {
            Err(HalError::StreamClosed(reason)) => {
                drop(handle);
                self.close_session(id, "stream closed").await;
                Err(HalError::StreamClosed(reason))
            }
            Err(HalError::ReadTimeout(t)) => {
                debug!("{}: read timed out after {:?}", self.name, t);
                Err(HalError::ReadTimeout(t))
            }
            other => other,
        }
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, HalError> {
        let prepared = self.backend.prepare_write(request)?;
        let (id, handle, cancel) = self.active()?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HalError::NotConnected(self.name.clone())),
            result = self.backend.write(&handle, prepared) => result,
        };

        match result {
            Ok((outcome, fingerprint)) => {
                if let Some(fingerprint) = fingerprint {
                    self.persist(&fingerprint).await;
                }
                Ok(outcome)
            }
            Err(HalError::StreamClosed(reason)) => {
                drop(handle);
                self.close_session(id, "stream closed").await;
                Err(HalError::StreamClosed(reason))
            }
            Err(e) => Err(e),
        }
    }
}
