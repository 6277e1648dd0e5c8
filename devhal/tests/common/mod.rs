//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use devhal::connection::DriverContext;
use devhal::drivers::serial::{SerialBackend, SerialDriver};
use devhal::drivers::storage::{StorageBackend, StorageDriver};
use devhal::drivers::usb::{UsbBackend, UsbDriver};
use devhal::drivers::wakelock::{WakeLockBackend, WakeLockDriver};
use devhal::events::EventPublisher;
use devhal::platform::simulation::{SimBehavior, SimDevice, SimDevices, SimStorage, SimWakeLock};
use devhal::platform::{PromptOutcome, Prompter};
use devhal::store::MemoryMetadataStore;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::types::ConnectOptions;
use std::sync::Arc;
use tokio::sync::Notify;

pub const ARDUINO_PORT: &str = "/dev/ttyACM0";
pub const ARDUINO_VID: u16 = 0x2341;
pub const ARDUINO_PID: u16 = 0x0043;

/// Store, publisher and context shared by the drivers of one test.
pub struct Harness {
    pub store: Arc<MemoryMetadataStore>,
    pub events: EventPublisher,
    pub ctx: DriverContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryMetadataStore::new()))
    }

    /// A fresh HAL instance over an existing store, as after a restart.
    pub fn with_store(store: Arc<MemoryMetadataStore>) -> Self {
        let events = EventPublisher::new();
        let ctx = DriverContext {
            store: store.clone(),
            events: events.clone(),
            io: IoSettings::default(),
        };
        Self { store, events, ctx }
    }

    pub fn serial(&self, sim: &Arc<SimDevices>) -> Arc<SerialDriver> {
        Arc::new(SerialDriver::new(
            "serial",
            SerialBackend::new(sim.clone()),
            ConnectOptions::new(),
            &self.ctx,
        ))
    }

    pub fn usb(&self, sim: &Arc<SimDevices>) -> Arc<UsbDriver> {
        Arc::new(UsbDriver::new(
            "usb",
            UsbBackend::new(sim.clone()),
            ConnectOptions::new(),
            &self.ctx,
        ))
    }

    pub fn storage(&self, sim: &Arc<SimStorage>) -> Arc<StorageDriver> {
        Arc::new(StorageDriver::new(
            "storage",
            StorageBackend::new(sim.clone()),
            ConnectOptions::new(),
            &self.ctx,
        ))
    }

    pub fn wake_lock(&self, sim: &Arc<SimWakeLock>) -> Arc<WakeLockDriver> {
        Arc::new(WakeLockDriver::new(
            "wakelock",
            WakeLockBackend::new(sim.clone()),
            ConnectOptions::new(),
            &self.ctx,
        ))
    }
}

/// Serial bus with one Arduino Uno, not yet granted.
pub fn arduino(behavior: SimBehavior) -> Arc<SimDevices> {
    let sim = Arc::new(SimDevices::new());
    sim.add_device(
        SimDevice::new(ARDUINO_PORT, ARDUINO_VID, ARDUINO_PID)
            .with_label("Arduino Uno")
            .with_behavior(behavior),
    );
    sim
}

/// Prompter that blocks until released, then selects the first choice.
#[derive(Default)]
pub struct GatedPrompter {
    pub gate: Notify,
    pub entered: Notify,
}

#[async_trait]
impl Prompter for GatedPrompter {
    async fn choose(&self, _title: &str, _choices: &[String]) -> PromptOutcome {
        self.entered.notify_one();
        self.gate.notified().await;
        PromptOutcome::Selected(0)
    }
}
