//! Transport error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a transport or its hardware backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Operation did not complete in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Fewer bytes were written than requested.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the device.
        written: usize,
        /// Bytes requested.
        expected: usize,
    },

    /// Transport used before its handshake completed.
    #[error("transport not ready: {0}")]
    NotReady(&'static str),

    /// Device disconnected or was unplugged.
    #[error("device gone")]
    DeviceGone,

    /// Transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// Handshake step failed (interface claim, GATT discovery, ...).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Platform I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}
