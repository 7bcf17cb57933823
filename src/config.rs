//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for:
//! - WAL settings (pending directory, retry interval)
//! - Heartbeat settings (interval, ping timeout)
//! - Device definitions (inline or from an include directory)

mod app;
mod device;
mod validation;

pub use app::{AcquisitionConfig, AppConfig, HeartbeatConfig, WalConfig};
pub use device::{ChannelConfig, DeviceConfig, RegisterConfig};
pub use validation::ConfigError;

// Re-export constants
pub use app::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RETRY_INTERVAL, DEFAULT_SHUTDOWN_GRACE};
pub use device::{DEFAULT_INTERVAL, MIN_INTERVAL};
