//! Storage and wake-lock driver behavior.

mod common;

use common::Harness;
use devhal::platform::simulation::{SimPromptResponse, SimStorage, SimWakeLock};
use devhal::store::{MemoryMetadataStore, load_fingerprint, save_fingerprint};
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::fingerprint::{StorageFingerprint, WakeLockFingerprint};
use devhal_common::hal::types::{
    ConnectMethod, ConnectOptions, ConnectionState, DirEntry, EntryKind, ReadOutput, ReadRequest,
    WakeLockStatus, WriteOutcome, WriteRequest,
};
use serde_json::json;
use std::sync::Arc;

fn documents() -> Arc<SimStorage> {
    let sim = Arc::new(SimStorage::new());
    sim.add_dir("docs", "Documents");
    sim.put_file("docs", "a.txt", b"alpha");
    sim.put_dir("docs", "photos");
    sim
}

fn screen_status(active: bool) -> ReadOutput {
    ReadOutput::WakeLock(WakeLockStatus {
        active,
        kind: "screen".to_string(),
    })
}

// ─── Storage ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_storage_lists_entries_with_kinds() {
    let h = Harness::new();
    let sim = documents();
    let driver = h.storage(&sim);

    let info = driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(info.resource, "Documents");

    let listing = driver.read(ReadRequest::default()).await.unwrap();
    assert_eq!(
        listing,
        ReadOutput::Entries(vec![
            DirEntry {
                name: "a.txt".to_string(),
                kind: EntryKind::File,
            },
            DirEntry {
                name: "photos".to_string(),
                kind: EntryKind::Directory,
            },
        ])
    );
}

#[tokio::test]
async fn test_storage_write_creates_or_overwrites_entry() {
    let h = Harness::new();
    let sim = documents();
    let driver = h.storage(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    let outcome = driver
        .write(WriteRequest::entry("notes.txt", "hello"))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written { bytes: 5 });
    assert_eq!(sim.file("docs", "notes.txt"), Some(b"hello".to_vec()));

    driver
        .write(WriteRequest::entry("notes.txt", json!([104, 105])))
        .await
        .unwrap();
    assert_eq!(sim.file("docs", "notes.txt"), Some(b"hi".to_vec()));

    let content = driver.read(ReadRequest::entry("notes.txt")).await.unwrap();
    assert_eq!(content, ReadOutput::Bytes(b"hi".to_vec()));
}

#[tokio::test]
async fn test_storage_rejects_invalid_writes() {
    let h = Harness::new();
    let sim = documents();
    let driver = h.storage(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    for request in [
        WriteRequest::data("no name"),
        WriteRequest::entry("../escape", "x"),
        WriteRequest::entry("", "x"),
        WriteRequest::entry("ok.txt", json!(42)),
        WriteRequest::entry("photos", "not a file"),
    ] {
        assert!(matches!(
            driver.write(request).await,
            Err(HalError::InvalidDataFormat(_))
        ));
    }
    assert_eq!(sim.file("docs", "ok.txt"), None);
}

#[tokio::test]
async fn test_storage_read_only_grant_prompts_again() {
    let h = Harness::new();
    let sim = documents();
    sim.grant("docs");
    sim.set_read_only("docs");
    save_fingerprint(
        h.store.as_ref(),
        "storage",
        "storage",
        &StorageFingerprint {
            capability: "docs".to_string(),
        },
    )
    .await
    .unwrap();

    let info = h.storage(&sim).connect(&ConnectOptions::new()).await.unwrap();

    assert_eq!(info.method, ConnectMethod::Interactive);
    assert_eq!(sim.prompt_count(), 1);
}

#[tokio::test]
async fn test_storage_restores_granted_directory() {
    let h = Harness::new();
    let sim = documents();
    sim.add_dir("music", "Music");
    sim.set_prompt(SimPromptResponse::Select("music".to_string()));
    let driver = h.storage(&sim);

    driver.connect(&ConnectOptions::new()).await.unwrap();
    driver.disconnect().await;
    let info = driver.connect(&ConnectOptions::new()).await.unwrap();

    assert_eq!(info.method, ConnectMethod::Restored);
    assert_eq!(info.resource, "Music");
    let stored: Option<StorageFingerprint> =
        load_fingerprint(h.store.as_ref(), "storage", "storage")
            .await
            .unwrap();
    assert_eq!(stored.map(|fp| fp.capability).as_deref(), Some("music"));
}

// ─── Wake-lock ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_wake_lock_acquire_and_release() {
    let h = Harness::new();
    let sim = Arc::new(SimWakeLock::new());
    let driver = h.wake_lock(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    assert_eq!(
        driver.read(ReadRequest::default()).await.unwrap(),
        screen_status(false)
    );

    let outcome = driver.write(WriteRequest::action("acquire")).await.unwrap();
    assert_eq!(
        outcome,
        WriteOutcome::WakeLock(WakeLockStatus {
            active: true,
            kind: "screen".to_string(),
        })
    );
    assert_eq!(sim.held_count(), 1);

    // Acquiring twice holds one lock.
    driver.write(WriteRequest::action("acquire")).await.unwrap();
    assert_eq!(sim.held_count(), 1);

    driver.write(WriteRequest::action("release")).await.unwrap();
    assert_eq!(sim.held_count(), 0);
    assert_eq!(
        driver.read(ReadRequest::default()).await.unwrap(),
        screen_status(false)
    );
}

#[tokio::test]
async fn test_wake_lock_rejects_unknown_actions() {
    let h = Harness::new();
    let sim = Arc::new(SimWakeLock::new());
    let driver = h.wake_lock(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();

    assert!(matches!(
        driver.write(WriteRequest::action("toggle")).await,
        Err(HalError::UnknownAction(_))
    ));
    assert!(matches!(
        driver.write(WriteRequest::data("acquire")).await,
        Err(HalError::InvalidDataFormat(_))
    ));
    assert_eq!(sim.request_count(), 0);
}

#[tokio::test]
async fn test_wake_lock_released_by_host_reads_inactive() {
    let h = Harness::new();
    let sim = Arc::new(SimWakeLock::new());
    let driver = h.wake_lock(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();
    driver.write(WriteRequest::action("acquire")).await.unwrap();

    sim.set_visible(false);

    assert_eq!(
        driver.read(ReadRequest::default()).await.unwrap(),
        screen_status(false)
    );
    assert!(matches!(
        driver.write(WriteRequest::action("acquire")).await,
        Err(HalError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_wake_lock_restart_reacquires_only_if_active() {
    let store = Arc::new(MemoryMetadataStore::new());
    let sim = Arc::new(SimWakeLock::new());

    let first = Harness::with_store(store.clone());
    let driver = first.wake_lock(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();
    driver.write(WriteRequest::action("acquire")).await.unwrap();
    let stored: Option<WakeLockFingerprint> =
        load_fingerprint(store.as_ref(), "wakelock", "wakelock")
            .await
            .unwrap();
    assert_eq!(stored.map(|fp| fp.was_active), Some(true));
    driver.disconnect().await;
    assert_eq!(sim.held_count(), 0);

    // Reload while the lock was active: re-acquired silently.
    let second = Harness::with_store(store.clone());
    let driver = second.wake_lock(&sim);
    let info = driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(info.method, ConnectMethod::Restored);
    assert_eq!(sim.held_count(), 1);
    driver.write(WriteRequest::action("release")).await.unwrap();
    driver.disconnect().await;

    // Reload after release: connected, lock not taken.
    let third = Harness::with_store(store);
    let driver = third.wake_lock(&sim);
    driver.connect(&ConnectOptions::new()).await.unwrap();
    assert_eq!(driver.state(), ConnectionState::Connected);
    assert_eq!(sim.held_count(), 0);
}

#[tokio::test]
async fn test_wake_lock_unsupported() {
    let h = Harness::new();
    let sim = Arc::new(SimWakeLock::new());
    sim.set_supported(false);
    let driver = h.wake_lock(&sim);

    assert!(matches!(
        driver.connect(&ConnectOptions::new()).await,
        Err(HalError::NoDeviceAvailable(_))
    ));
    assert_eq!(driver.state(), ConnectionState::Error);
}
