//! USB bulk-transfer transport.
//!
//! The instrument exposes one interface with a bulk-OUT endpoint for commands
//! and a bulk-IN endpoint for replies. Platform access (libusb, Android host
//! API, ...) is supplied through [`UsbBulkBackend`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::discovery::TransportKind;
use crate::error::TransportError;
use crate::Transport;

/// Platform access to a claimed USB device.
pub trait UsbBulkBackend: Send + Sync {
    /// Claim the data interface.
    fn claim_interface(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Release the data interface. Must be safe to call more than once.
    fn release_interface(&self);

    /// Write to the bulk-OUT endpoint, returning the number of bytes accepted.
    fn bulk_write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from the bulk-IN endpoint.
    fn bulk_read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Abort any transfer currently in flight.
    fn cancel(&self);
}

/// Transport over a USB bulk endpoint pair.
pub struct UsbTransport {
    backend: Box<dyn UsbBulkBackend>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl UsbTransport {
    /// Wrap a backend. The interface is claimed by [`Transport::open`].
    pub fn new(backend: Box<dyn UsbBulkBackend>) -> Self {
        Self {
            backend,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn check_ready(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotReady("usb interface not claimed"));
        }
        Ok(())
    }

    fn on_error(&self, err: &TransportError) {
        if matches!(err, TransportError::DeviceGone) {
            self.open.store(false, Ordering::Release);
        }
    }
}

impl Transport for UsbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn open(&self, timeout: Duration) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.open.load(Ordering::Acquire) {
            return Ok(());
        }
        self.backend.claim_interface(timeout)?;
        self.open.store(true, Ordering::Release);
        debug!("usb interface claimed");
        Ok(())
    }

    fn send(&self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.check_ready()?;
        let written = self.backend.bulk_write(data, timeout).inspect_err(|e| self.on_error(e))?;
        if written != data.len() {
            warn!(written, expected = data.len(), "usb short write");
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        trace!(len = data.len(), "usb bulk out");
        Ok(())
    }

    fn receive(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.check_ready()?;
        let data = self
            .backend
            .bulk_read(max_len, timeout)
            .inspect_err(|e| self.on_error(e))?;
        trace!(len = data.len(), "usb bulk in");
        Ok(data)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.open.store(false, Ordering::Release);
        self.backend.cancel();
        self.backend.release_interface();
        debug!("usb transport closed");
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}
