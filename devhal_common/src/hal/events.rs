//! Outward HAL notifications.
//!
//! The HAL publishes these one-way; it never consumes them itself.

use crate::hal::types::ConnectMethod;
use serde::{Deserialize, Serialize};

/// Event published by drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HalEvent {
    /// A connect attempt completed
    DriverConnected {
        /// Driver name
        driver: String,
        /// How the connection was established
        method: ConnectMethod,
    },
    /// A connection was released
    DriverDisconnected {
        /// Driver name
        driver: String,
    },
}

impl HalEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DriverConnected { .. } => "driver-connected",
            Self::DriverDisconnected { .. } => "driver-disconnected",
        }
    }

    /// Driver the event refers to.
    pub fn driver(&self) -> &str {
        match self {
            Self::DriverConnected { driver, .. } | Self::DriverDisconnected { driver } => driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = HalEvent::DriverConnected {
            driver: "serial".to_string(),
            method: ConnectMethod::Restored,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"driver-connected","driver":"serial","method":"restored"}"#
        );
        assert_eq!(event.name(), "driver-connected");

        let event = HalEvent::DriverDisconnected {
            driver: "usb".to_string(),
        };
        assert_eq!(event.name(), "driver-disconnected");
        assert_eq!(event.driver(), "usb");
    }
}
