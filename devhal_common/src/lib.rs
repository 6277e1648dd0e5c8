//! devhal Common Library
//!
//! This crate provides the driver contract, shared types and configuration
//! loading utilities for all devhal workspace crates. It performs no device
//! I/O of its own.
//!
//! # Module Structure
//!
//! - [`hal`] - Driver trait, error taxonomy, data model and HAL configuration
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use devhal_common::prelude::*;
//!
//! let options = ConnectOptions::new().with("baudRate", 9600);
//! assert_eq!(options.baud_rate(), 9600);
//! ```

pub mod config;
pub mod hal;
pub mod prelude;
