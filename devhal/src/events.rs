//! Event publisher for host shell integration.
//!
//! Drivers publish `driver-connected` / `driver-disconnected` through a
//! shared [`EventPublisher`]. Hosts subscribe to a broadcast receiver; the
//! HAL itself never subscribes.

use devhal_common::hal::events::HalEvent;
use devhal_common::hal::types::ConnectMethod;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default capacity of the event channel.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Cloneable publisher handle shared by all drivers.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<HalEvent>,
}

impl EventPublisher {
    /// Create a publisher with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HalEvent> {
        self.sender.subscribe()
    }

    /// Publish `driver-connected`.
    pub fn connected(&self, driver: &str, method: ConnectMethod) {
        self.publish(HalEvent::DriverConnected {
            driver: driver.to_string(),
            method,
        });
    }

    /// Publish `driver-disconnected`.
    pub fn disconnected(&self, driver: &str) {
        self.publish(HalEvent::DriverDisconnected {
            driver: driver.to_string(),
        });
    }

    fn publish(&self, event: HalEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!("Published {} to {} subscriber(s)", name, receivers),
            // No subscribers is normal for headless use.
            Err(_) => trace!("Published {} with no subscribers", name),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
