//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::device::DeviceConfig;
use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default WAL retry interval (30 seconds).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default heartbeat interval (10 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default heartbeat ping timeout (2 seconds).
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Default grace period for poll loops to finish on shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn default_wal_dir() -> PathBuf {
    PathBuf::from("./wal")
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_ping_timeout() -> Duration {
    DEFAULT_PING_TIMEOUT
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

// =============================================================================
// Sections
// =============================================================================

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Pending directory (default: "./wal").
    #[serde(default = "default_wal_dir")]
    pub dir: PathBuf,

    /// Retry scan interval (default: 30s).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: default_wal_dir(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Heartbeat monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Sweep interval (default: 10s).
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-device ping timeout (default: 2s).
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

/// Acquisition service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// How long poll loops get to finish after cancellation (default: 5s).
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub wal: WalConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Inline device definitions.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Path to a directory with additional device config files.
    #[serde(default)]
    pub device_path: Option<String>,
}

/// Shape of a standalone device file under `device_path`.
#[derive(Debug, Deserialize)]
struct DevicesFile {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including the `device_path` directory.
    ///
    /// Every `*.yaml`/`*.yml` file in the directory contributes its
    /// `devices:` list, merged after the inline devices in file name order.
    pub fn load_with_device_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(device_dir) = config.device_path.clone() {
            config.devices.extend(load_devices_from_dir(&device_dir)?);
            config.validate()?;
        }
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wal.retry_interval < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "wal retry_interval must be at least 1s".to_string(),
            ));
        }
        if self.heartbeat.interval < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "heartbeat interval must be at least 1s".to_string(),
            ));
        }
        if self.heartbeat.ping_timeout >= self.heartbeat.interval {
            return Err(ConfigError::Validation(
                "heartbeat ping_timeout must be shorter than the interval".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen.insert(device.plc_code.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate device code '{}'",
                    device.plc_code
                )));
            }
        }
        Ok(())
    }

    /// Devices that the orchestrator should poll.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled)
    }
}

fn load_devices_from_dir(dir: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut devices = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let file: DevicesFile = serde_yaml::from_str(&content)?;
        tracing::debug!(file = %path.display(), devices = file.devices.len(), "Device file loaded");
        devices.extend(file.devices);
    }
    Ok(devices)
}
