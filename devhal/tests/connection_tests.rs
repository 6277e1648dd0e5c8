//! Driver contract tests: connect/disconnect lifecycle, read deadline,
//! reader exclusivity, write validation and notifications.

mod common;

use async_trait::async_trait;
use common::{ARDUINO_PORT, GatedPrompter, Harness, arduino};
use devhal::core::HalCore;
use devhal::drivers::storage::{StorageBackend, StorageDriver};
use devhal::drivers::wakelock::{
    WakeLockBackend, WakeLockDriver, WakeLockPlatform, WakeLockSentinel,
};
use devhal::platform::Platforms;
use devhal::platform::fs_storage::FsStoragePlatform;
use devhal::platform::simulation::{SimBehavior, SimDevice, SimDevices, SimPromptResponse};
use devhal::store::MemoryMetadataStore;
use devhal_common::hal::config::HalConfig;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::events::HalEvent;
use devhal_common::hal::types::{
    ConnectMethod, ConnectOptions, ConnectionState, ReadOutput, ReadRequest, WakeLockStatus,
    WriteRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

// ─── Connect ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_twice_prompts_once() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);

    let first = driver.connect(&ConnectOptions::new()).await.unwrap();
    let second = driver.connect(&ConnectOptions::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.method, ConnectMethod::Interactive);
    assert_eq!(sim.prompt_count(), 1);
    assert_eq!(sim.open_count(), 1);
    assert_eq!(driver.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_applies_baud_rate_option() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);

    let info = driver
        .connect(&ConnectOptions::new().with("baudRate", 9600).with("ignored", true))
        .await
        .unwrap();

    assert_eq!(sim.last_open_param(), Some(9600));
    assert_eq!(info.details.get("baudRate").map(String::as_str), Some("9600"));
}

#[tokio::test]
async fn test_connect_defaults_to_115200_baud() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    h.serial(&sim).connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(sim.last_open_param(), Some(115_200));
}

#[tokio::test]
async fn test_unsupported_host_fails_with_no_device() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    sim.set_supported(false);
    let driver = h.serial(&sim);

    assert!(!driver.detect().await);
    let result = driver.connect(&ConnectOptions::new()).await;

    assert!(matches!(result, Err(HalError::NoDeviceAvailable(_))));
    assert_eq!(driver.state(), ConnectionState::Error);
    assert_eq!(sim.prompt_count(), 0);
    assert!(driver.descriptor().last_error.is_some());
}

#[tokio::test]
async fn test_cancelled_and_denied_prompts() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);

    sim.set_prompt(SimPromptResponse::Cancel);
    assert!(matches!(
        driver.connect(&ConnectOptions::new()).await,
        Err(HalError::NoDeviceAvailable(_))
    ));
    assert_eq!(driver.state(), ConnectionState::Error);

    sim.set_prompt(SimPromptResponse::Deny);
    assert!(matches!(
        driver.connect(&ConnectOptions::new()).await,
        Err(HalError::PermissionDenied(_))
    ));

    // Error is not terminal.
    sim.set_prompt(SimPromptResponse::SelectFirst);
    driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(driver.state(), ConnectionState::Connected);
    assert!(driver.descriptor().last_error.is_none());
}

#[tokio::test]
async fn test_concurrent_connect_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let prompter = Arc::new(GatedPrompter::default());
    let platform = Arc::new(FsStoragePlatform::new(
        vec![tmp.path().to_path_buf()],
        prompter.clone(),
    ));
    let h = Harness::new();
    let driver = Arc::new(StorageDriver::new(
        "storage",
        StorageBackend::new(platform),
        ConnectOptions::new(),
        &h.ctx,
    ));

    let pending = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.connect(&ConnectOptions::new()).await })
    };
    prompter.entered.notified().await;
    assert_eq!(driver.state(), ConnectionState::AwaitingUserSelection);

    let second = driver.connect(&ConnectOptions::new()).await;
    assert!(matches!(second, Err(HalError::AlreadyInProgress(_))));

    // Disconnect during the prompt does not interfere.
    driver.disconnect().await;
    assert_eq!(driver.state(), ConnectionState::AwaitingUserSelection);

    prompter.gate.notify_one();
    let info = pending.await.unwrap().unwrap();
    assert_eq!(info.method, ConnectMethod::Interactive);
    assert_eq!(driver.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_abandoned_connect_moves_to_error() {
    let tmp = TempDir::new().unwrap();
    let prompter = Arc::new(GatedPrompter::default());
    let platform = Arc::new(FsStoragePlatform::new(
        vec![tmp.path().to_path_buf()],
        prompter.clone(),
    ));
    let h = Harness::new();
    let driver = Arc::new(StorageDriver::new(
        "storage",
        StorageBackend::new(platform),
        ConnectOptions::new(),
        &h.ctx,
    ));

    let pending = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.connect(&ConnectOptions::new()).await })
    };
    prompter.entered.notified().await;
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert_eq!(driver.state(), ConnectionState::Error);

    // The slot was released: a new attempt can run.
    prompter.gate.notify_one();
    driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(driver.state(), ConnectionState::Connected);
}

// ─── Disconnect ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_releases_handle_for_every_kind() {
    let core = HalCore::with_store(
        HalConfig::default(),
        Arc::new(MemoryMetadataStore::new()),
        Platforms::simulated(),
    )
    .unwrap();

    for driver in core.registry().list() {
        driver.connect(&ConnectOptions::new()).await.unwrap();
        assert!(driver.descriptor().has_handle, "{}", driver.name());

        driver.disconnect().await;
        let descriptor = driver.descriptor();
        assert_eq!(descriptor.state, ConnectionState::Disconnected);
        assert!(!descriptor.has_handle, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_disconnect_is_idempotent_for_every_kind() {
    let core = HalCore::with_store(
        HalConfig::default(),
        Arc::new(MemoryMetadataStore::new()),
        Platforms::simulated(),
    )
    .unwrap();
    let mut events = core.subscribe();

    for driver in core.registry().list() {
        // Never connected: nothing to release.
        driver.disconnect().await;
        assert_eq!(driver.state(), ConnectionState::Uninitialized);

        driver.connect(&ConnectOptions::new()).await.unwrap();
        driver.disconnect().await;
        driver.disconnect().await;
        assert_eq!(driver.state(), ConnectionState::Disconnected);
    }

    let mut disconnects = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, HalEvent::DriverDisconnected { .. }) {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, core.registry().len());
}

#[tokio::test]
async fn test_disconnect_after_error_returns_to_disconnected() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    sim.set_prompt(SimPromptResponse::Cancel);
    let driver = h.serial(&sim);

    let _ = driver.connect(&ConnectOptions::new()).await;
    assert_eq!(driver.state(), ConnectionState::Error);

    driver.disconnect().await;
    assert_eq!(driver.state(), ConnectionState::Disconnected);
}

/// Wake-lock host whose lock release takes 100ms.
#[derive(Default)]
struct SlowReleaseWakeLock {
    held: Arc<AtomicUsize>,
}

struct SlowSentinel {
    held: Arc<AtomicUsize>,
    released: AtomicBool,
}

#[async_trait]
impl WakeLockSentinel for SlowSentinel {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    async fn release(&self) -> Result<(), HalError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !self.released.swap(true, Ordering::SeqCst) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl WakeLockPlatform for SlowReleaseWakeLock {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_visible(&self) -> bool {
        true
    }

    async fn request(&self, _kind: &str) -> Result<Box<dyn WakeLockSentinel>, HalError> {
        self.held.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SlowSentinel {
            held: Arc::clone(&self.held),
            released: AtomicBool::new(false),
        }))
    }
}

#[tokio::test]
async fn test_connect_while_disconnect_closes_is_rejected() {
    let h = Harness::new();
    let platform = Arc::new(SlowReleaseWakeLock::default());
    let driver = Arc::new(WakeLockDriver::new(
        "wakelock",
        WakeLockBackend::new(platform.clone()),
        ConnectOptions::new(),
        &h.ctx,
    ));
    driver.connect(&ConnectOptions::new()).await.unwrap();
    driver.write(WriteRequest::action("acquire")).await.unwrap();

    let releasing = tokio::spawn({
        let driver = Arc::clone(&driver);
        async move { driver.disconnect().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(
        driver.connect(&ConnectOptions::new()).await,
        Err(HalError::AlreadyInProgress(_))
    ));

    releasing.await.unwrap();
    assert_eq!(driver.state(), ConnectionState::Disconnected);
    assert!(!driver.descriptor().has_handle);
    assert_eq!(platform.held.load(Ordering::SeqCst), 0);

    // Once closed, the driver reconnects and re-takes the lock.
    let info = driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(info.method, ConnectMethod::Restored);
    assert_eq!(
        driver.read(ReadRequest::default()).await.unwrap(),
        ReadOutput::WakeLock(WakeLockStatus {
            active: true,
            kind: "screen".to_string(),
        })
    );
    assert_eq!(platform.held.load(Ordering::SeqCst), 1);

    driver.disconnect().await;
    assert_eq!(platform.held.load(Ordering::SeqCst), 0);
    assert!(!driver.descriptor().has_handle);
}

// ─── Read ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_timeout_keeps_connection() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let start = Instant::now();
    let result = driver
        .read(ReadRequest::with_timeout(Duration::from_millis(100)))
        .await;
    let elapsed = start.elapsed();

    assert_eq!(result, Err(HalError::ReadTimeout(Duration::from_millis(100))));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(driver.state(), ConnectionState::Connected);
    assert!(!driver.descriptor().reader_active);
}

#[tokio::test]
async fn test_read_returns_inbound_bytes() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let mut peer = sim.take_peer(ARDUINO_PORT).unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut peer, b"ready").await.unwrap();

    let output = driver
        .read(ReadRequest::with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(output, ReadOutput::Bytes(b"ready".to_vec()));
}

#[tokio::test]
async fn test_second_reader_is_busy_and_disconnect_cancels_first() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let pending = {
        let driver = driver.clone();
        tokio::spawn(async move {
            driver
                .read(ReadRequest::with_timeout(Duration::from_secs(5)))
                .await
        })
    };
    while !driver.descriptor().reader_active {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = driver
        .read(ReadRequest::with_timeout(Duration::from_millis(50)))
        .await;
    assert!(matches!(second, Err(HalError::ReaderBusy(_))));

    let start = Instant::now();
    driver.disconnect().await;
    let first = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending read should end promptly")
        .unwrap();

    assert!(matches!(first, Err(HalError::NotConnected(_))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(driver.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_stream_closed_forces_disconnect() {
    let h = Harness::new();
    let sim = Arc::new(SimDevices::new());
    sim.add_device(
        SimDevice::new(ARDUINO_PORT, 0x2341, 0x0043)
            .with_inbound(b"bye")
            .with_behavior(SimBehavior::Hangup),
    );
    let driver = h.serial(&sim);
    let mut events = h.events.subscribe();
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let output = driver.read(ReadRequest::default()).await.unwrap();
    assert_eq!(output, ReadOutput::Bytes(b"bye".to_vec()));

    let closed = driver.read(ReadRequest::default()).await;
    assert!(matches!(closed, Err(HalError::StreamClosed(_))));
    assert_eq!(driver.state(), ConnectionState::Disconnected);
    assert!(!driver.descriptor().has_handle);

    assert!(matches!(
        events.try_recv(),
        Ok(HalEvent::DriverConnected { .. })
    ));
    assert_eq!(
        events.try_recv(),
        Ok(HalEvent::DriverDisconnected {
            driver: "serial".to_string()
        })
    );
}

#[tokio::test]
async fn test_read_and_write_require_connection() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Loopback);
    let driver = h.serial(&sim);

    assert!(matches!(
        driver.read(ReadRequest::default()).await,
        Err(HalError::NotConnected(_))
    ));
    assert!(matches!(
        driver.write(WriteRequest::data("x")).await,
        Err(HalError::NotConnected(_))
    ));
}

// ─── Write ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_write_accepts_text_byte_arrays_and_bytes() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Loopback);
    let driver = h.serial(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let outcome = driver.write(WriteRequest::data("hello")).await.unwrap();
    assert_eq!(outcome.bytes_written(), Some(5));
    let echoed = driver
        .read(ReadRequest::with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(echoed, ReadOutput::Bytes(b"hello".to_vec()));

    let outcome = driver.write(WriteRequest::data(json!([104, 105]))).await.unwrap();
    assert_eq!(outcome.bytes_written(), Some(2));

    let outcome = driver.write(WriteRequest::data(b"hi")).await.unwrap();
    assert_eq!(outcome.bytes_written(), Some(2));
}

#[tokio::test]
async fn test_invalid_write_fails_before_device_access() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);

    // Rejected even while disconnected: validation precedes any I/O.
    assert!(matches!(
        driver.write(WriteRequest::data(json!(42))).await,
        Err(HalError::InvalidDataFormat(_))
    ));

    driver.connect(&ConnectOptions::new()).await.unwrap();
    let mut peer = sim.take_peer(ARDUINO_PORT).unwrap();

    for bad in [json!(42), json!([1, 256]), json!([-1]), json!({"a": 1})] {
        assert!(matches!(
            driver.write(WriteRequest::data(bad)).await,
            Err(HalError::InvalidDataFormat(_))
        ));
    }
    assert!(matches!(
        driver.write(WriteRequest::action("acquire")).await,
        Err(HalError::InvalidDataFormat(_))
    ));

    // Nothing reached the device.
    let mut buf = [0u8; 8];
    let nothing = tokio::time::timeout(
        Duration::from_millis(50),
        tokio::io::AsyncReadExt::read(&mut peer, &mut buf),
    )
    .await;
    assert!(nothing.is_err());
    assert_eq!(driver.state(), ConnectionState::Connected);
}

// ─── Events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_follow_connection_lifecycle() {
    let h = Harness::new();
    let sim = arduino(SimBehavior::Silent);
    let driver = h.serial(&sim);
    let mut events = h.events.subscribe();

    driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(
        events.try_recv(),
        Ok(HalEvent::DriverConnected {
            driver: "serial".to_string(),
            method: ConnectMethod::Interactive,
        })
    );

    // The idempotent no-op publishes nothing.
    driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

    driver.disconnect().await;
    assert_eq!(
        events.try_recv(),
        Ok(HalEvent::DriverDisconnected {
            driver: "serial".to_string()
        })
    );

    // Nothing to release, nothing published.
    driver.disconnect().await;
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}
