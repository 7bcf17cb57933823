//! Device, channel, and register configuration.
//!
//! A device is one controller endpoint; its channels are register groups
//! collected together into one table row shape. Configuration is loaded
//! once at startup and immutable for the process lifetime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::ConfigError;
use crate::plc::{DataType, StrEncoding};

/// Default collection interval (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum collection interval (100 milliseconds).
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

fn default_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

/// One register: a named, typed, addressable location on the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Column name the decoded value lands in.
    pub column: String,
    /// Register address.
    pub address: u16,
    /// Byte length; only meaningful for `string` registers, fixed-width
    /// types derive their length from the data type.
    #[serde(default)]
    pub length: u16,
    pub data_type: DataType,
    /// Optional arithmetic transform with `value` bound to the decoded value.
    #[serde(default)]
    pub expression: Option<String>,
    /// String decoding; ignored for non-string types.
    #[serde(default)]
    pub encoding: StrEncoding,
}

impl RegisterConfig {
    /// Bytes to request from the device for this register.
    pub fn read_length(&self) -> u16 {
        match self.data_type.wire_width() {
            Some(width) => width as u16,
            None => self.length,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.column.trim().is_empty() {
            return Err(ConfigError::Validation(
                "register column must be non-empty".to_string(),
            ));
        }
        if self.data_type == DataType::String && self.length == 0 {
            return Err(ConfigError::Validation(format!(
                "string register '{}' needs a length",
                self.column
            )));
        }
        if let Some(expr) = &self.expression {
            if !expr.trim().is_empty() && !expr.contains("value") {
                return Err(ConfigError::Validation(format!(
                    "expression on register '{}' does not reference 'value'",
                    self.column
                )));
            }
        }
        Ok(())
    }
}

/// One register group collected into a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel code, unique within the device.
    pub name: String,
    /// Destination table in the primary store.
    pub table: String,
    /// Messages buffered per table before a batch write (default: 1,
    /// meaning every message is written singly).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Collection interval (default: 1s, minimum: 100ms).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Registers in declaration order; this order is the column order.
    pub registers: Vec<RegisterConfig>,
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "channel name must be non-empty".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "channel '{}' table must be non-empty",
                self.name
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(format!(
                "channel '{}' batch_size must be at least 1",
                self.name
            )));
        }
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "channel '{}' interval must be at least {:?}",
                self.name, MIN_INTERVAL
            )));
        }
        if self.registers.is_empty() {
            return Err(ConfigError::Validation(format!(
                "channel '{}' has no registers",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for register in &self.registers {
            register.validate()?;
            if !seen.insert(register.column.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "channel '{}' has duplicate column '{}'",
                    self.name, register.column
                )));
            }
        }
        Ok(())
    }
}

/// One controller endpoint and its register groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device code, unique across the configuration.
    pub plc_code: String,
    /// Network endpoint, e.g. `10.0.0.5:502`.
    pub endpoint: String,
    /// Protocol family selector, resolved by the client factory.
    pub protocol: String,
    /// Disabled devices are skipped by the orchestrator (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plc_code.trim().is_empty() {
            return Err(ConfigError::Validation(
                "device plc_code must be non-empty".to_string(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "device '{}' endpoint must be non-empty",
                self.plc_code
            )));
        }
        if self.protocol.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "device '{}' protocol must be non-empty",
                self.plc_code
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "device '{}' has duplicate channel '{}'",
                    self.plc_code, channel.name
                )));
            }
        }
        Ok(())
    }

    /// Shortest channel interval, used as the device poll tick.
    pub fn min_interval(&self) -> Duration {
        self.channels
            .iter()
            .map(|c| c.interval)
            .min()
            .unwrap_or(DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
impl DeviceConfig {
    /// Bare device for unit tests that do not poll channels.
    pub(crate) fn for_tests(plc_code: &str, protocol: &str) -> Self {
        Self {
            plc_code: plc_code.to_string(),
            endpoint: "127.0.0.1:502".to_string(),
            protocol: protocol.to_string(),
            enabled: true,
            channels: Vec::new(),
        }
    }
}
