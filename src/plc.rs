//! PLC Layer
//!
//! Everything between the gateway and the controllers: the typed value
//! model, byte transcoding, the protocol client capability, the per-device
//! lifecycle store, and the heartbeat monitor.
//!
//! # Architecture
//!
//! - [`Value`] / [`DataType`]: tagged primitive values and their wire types
//! - [`PlcClient`] / [`PlcClientFactory`]: wire-protocol capability, consumed
//! - [`ClientLifecycle`] / [`DeviceSlot`]: one client + I/O lock + health
//!   flag per device code
//! - [`HeartbeatMonitor`]: periodic reachability sweep

pub mod client;
pub mod codec;
mod error;
mod heartbeat;
mod lifecycle;
pub mod mock;
mod value;

pub use client::{PlcClient, PlcClientFactory};
pub use codec::StrEncoding;
pub use error::PlcError;
pub use heartbeat::HeartbeatMonitor;
pub use lifecycle::{ClientLifecycle, DeviceSlot, PlcConnectionStatus};
pub use value::{DataType, Value, ValueParseError};
