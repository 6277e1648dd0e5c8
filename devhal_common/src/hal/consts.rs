//! HAL constants.
//!
//! Defaults shared by the configuration layer and the drivers.

/// Canonical HAL service name (used for logging and the default config).
pub const HAL_SERVICE_NAME: &str = "devhal";

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/devhal/devhal.toml";

/// Default metadata store directory (relative to the config directory)
pub const DEFAULT_STORE_DIR: &str = "state";

/// Serial baud rate used when `connect` options carry none
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout applied when a read request carries none
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Maximum bytes returned by a single stream read
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Format version of persisted fingerprint records
pub const FINGERPRINT_FORMAT_VERSION: u32 = 1;

/// Option key: serial baud rate
pub const OPT_BAUD_RATE: &str = "baudRate";

/// Option key: vendor/product filters for the device chooser
pub const OPT_FILTERS: &str = "filters";

/// Option key: USB interface number to claim
pub const OPT_INTERFACE: &str = "interface";

/// Wake-lock kind requested by the wake-lock driver
pub const WAKE_LOCK_KIND_SCREEN: &str = "screen";
