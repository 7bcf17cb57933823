//! Wire-protocol client capability.
//!
//! The gateway does not implement any PLC protocol itself; it consumes a
//! driver through [`PlcClient`]. Drivers are constructed per device by a
//! [`PlcClientFactory`] keyed on the configured protocol family.
//!
//! # Error Handling Philosophy
//!
//! Connection failures are valid observations, not driver bugs: callers
//! surface them through the device health flag and retry on the next poll
//! tick. A driver should only return errors for conditions the caller can
//! classify (connect, timeout, rejected, short read).

use async_trait::async_trait;

use super::codec::{self, StrEncoding};
use super::error::PlcError;
use super::value::{DataType, Value};
use crate::config::DeviceConfig;

/// One protocol session against one device.
///
/// All methods take `&mut self`: the owning [`DeviceSlot`] wraps the client
/// in the per-device mutex, so no two operations ever run against the same
/// connection concurrently.
///
/// [`DeviceSlot`]: super::lifecycle::DeviceSlot
#[async_trait]
pub trait PlcClient: Send {
    /// Establish the connection. Must be idempotent when already connected.
    async fn connect(&mut self) -> Result<(), PlcError>;

    /// Tear down the connection. Idempotent.
    async fn close(&mut self) -> Result<(), PlcError>;

    /// Liveness probe. Never errors; unreachable is `false`.
    async fn ping(&mut self) -> bool;

    /// Read `length` raw bytes starting at `address`.
    async fn read_bytes(&mut self, address: u16, length: u16) -> Result<Vec<u8>, PlcError>;

    /// Write a typed value at `address`.
    async fn write_value(&mut self, address: u16, value: Value) -> Result<(), PlcError>;

    /// Read and decode one typed value.
    ///
    /// Default implementation reads the raw range and transcodes at offset 0;
    /// drivers with native typed reads may override.
    async fn read_value(
        &mut self,
        address: u16,
        length: u16,
        data_type: DataType,
        encoding: StrEncoding,
    ) -> Result<Value, PlcError> {
        let width = data_type
            .wire_width()
            .unwrap_or(length as usize)
            .max(length as usize);
        let buf = self.read_bytes(address, width as u16).await?;
        codec::decode_at(&buf, 0, data_type, length as usize, encoding)
    }
}

/// Constructs protocol clients from device configuration.
///
/// The factory owns the mapping from protocol family selector to driver;
/// the lifecycle manager calls it exactly once per device code.
pub trait PlcClientFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig) -> Result<Box<dyn PlcClient>, PlcError>;
}
