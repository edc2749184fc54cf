//! Transports for EMFAD instruments.
//!
//! A [`Transport`] moves opaque bytes to and from one instrument. It knows
//! nothing about frames or commands; the device session layers the protocol
//! on top. Two implementations exist:
//!
//! - [`UsbTransport`]: bulk-OUT/bulk-IN endpoint pair over a [`UsbBulkBackend`]
//! - [`BleTransport`]: command-write/notify characteristics over a [`GattBackend`]
//!
//! Both behave the same from the caller's side: `open` runs the link-level
//! handshake, `send` and `receive` are blocking with a deadline, and `close`
//! releases the link and wakes any blocked call.

use std::time::Duration;

mod ble;
mod discovery;
mod error;
mod identifiers;
mod usb;

pub use ble::*;
pub use discovery::*;
pub use error::*;
pub use identifiers::*;
pub use usb::*;

/// Deadline for opening a link.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for one command round trip.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte-level link to one instrument.
///
/// All methods take `&self`; implementations synchronize internally so that
/// `close` can be called from another thread while a `receive` is blocked.
pub trait Transport: Send + Sync {
    /// Link type.
    fn kind(&self) -> TransportKind;

    /// Run the link-level handshake. Idempotent once open.
    fn open(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Send all of `data` or fail.
    fn send(&self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Receive at most `max_len` bytes, blocking up to `timeout` for the first byte.
    fn receive(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Whether the handshake completed and the link has not been lost or closed.
    fn is_open(&self) -> bool;

    /// Release the link. Idempotent; a closed transport cannot be reopened.
    fn close(&self);
}
