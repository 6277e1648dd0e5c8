//! # devhal Library
//!
//! Hardware abstraction layer for host-attached peripherals: serial ports,
//! USB devices, writable local storage and the screen wake-lock, behind one
//! driver contract defined in `devhal_common::hal::driver`.
//!
//! # Module Structure
//!
//! - [`core`] - HalCore wiring and shutdown
//! - [`driver_registry`] - Named driver instances
//! - [`connection`] - Generic state machine, reader slot and read deadline
//! - [`orchestrator`] - Silent restoration with interactive fallback
//! - [`store`] - Persistent metadata store for fingerprints
//! - [`events`] - `driver-connected` / `driver-disconnected` publishing
//! - [`drivers`] - Serial, USB, storage and wake-lock drivers
//! - [`platform`] - Host backends (simulated, filesystem, native serial)
//! - [`stream`] - Byte stream handle for serial and USB
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             devhal                                │
//! │  ┌──────────────┐    ┌───────────────────┐    ┌───────────────┐   │
//! │  │  HalCore     │───►│  DriverRegistry   │───►│ Arc<dyn Driver>│  │
//! │  └──────────────┘    └───────────────────┘    └───────┬───────┘   │
//! │                                                       ▼           │
//! │  ┌──────────────┐    ┌───────────────────┐    ┌───────────────┐   │
//! │  │ MetadataStore│◄───│   Orchestrator    │◄───│  DriverCore   │   │
//! │  └──────────────┘    └───────────────────┘    └───────┬───────┘   │
//! │                                                       ▼           │
//! │                                               ┌───────────────┐   │
//! │                                               │   Platform    │   │
//! │                                               └───────────────┘   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod connection;
pub mod core;
pub mod driver_registry;
pub mod drivers;
pub mod events;
pub mod orchestrator;
pub mod platform;
pub mod store;
pub mod stream;

// Re-export key types for convenience
pub use crate::connection::{DriverContext, DriverCore};
pub use crate::core::HalCore;
pub use crate::driver_registry::DriverRegistry;
pub use crate::drivers::serial::SerialDriver;
pub use crate::drivers::storage::StorageDriver;
pub use crate::drivers::usb::UsbDriver;
pub use crate::drivers::wakelock::WakeLockDriver;
pub use crate::events::EventPublisher;
pub use crate::platform::{Platforms, PromptOutcome, Prompter};
pub use crate::store::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
