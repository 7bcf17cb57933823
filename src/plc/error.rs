//! PLC-layer error types.

use thiserror::Error;

/// Errors raised by client construction, connection, and register I/O.
#[derive(Debug, Error)]
pub enum PlcError {
    /// Could not establish a connection to the device.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Underlying transport error during read/write.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A decode asked for more bytes than the buffer holds.
    #[error("short buffer: need {need} bytes at offset {offset}, have {have}")]
    ShortBuffer {
        need: usize,
        offset: usize,
        have: usize,
    },

    /// No driver registered for the configured protocol family.
    #[error("unsupported protocol family: {0}")]
    UnsupportedProtocol(String),

    /// The device code is not present in the configuration.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The device accepted the connection but rejected the operation.
    #[error("request rejected: {0}")]
    Rejected(String),
}
