//! Hardware abstraction layer contract and data model.
//!
//! This module contains everything a driver implementation and a host
//! shell need to agree on:
//! - [`driver`] - `Driver` trait and `HalError` taxonomy
//! - [`types`] - Descriptor, connection state machine, I/O request types
//! - [`fingerprint`] - Persisted re-acquisition data per driver kind
//! - [`events`] - Outward notifications
//! - [`config`] - `devhal.toml` configuration
//! - [`consts`] - Defaults

pub mod config;
pub mod consts;
pub mod driver;
pub mod events;
pub mod fingerprint;
pub mod types;
