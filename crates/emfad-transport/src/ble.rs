//! BLE GATT transport.
//!
//! Commands are written to the command characteristic and each write waits for
//! its confirmation. Replies arrive as notifications on the notify
//! characteristic; the backend pushes them into a channel and [`receive`]
//! blocks on that channel with a deadline.
//!
//! [`receive`]: crate::Transport::receive

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::discovery::TransportKind;
use crate::error::TransportError;
use crate::identifiers::DeviceIdentifiers;
use crate::Transport;

/// Events delivered by a GATT backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// Value notified on a subscribed characteristic.
    Notification(Vec<u8>),
    /// Peripheral dropped the connection.
    Disconnected,
}

/// Callback a backend invokes for every [`GattEvent`].
pub type GattEventSink = Box<dyn Fn(GattEvent) + Send + Sync>;

/// Platform access to one BLE peripheral.
pub trait GattBackend: Send + Sync {
    /// Establish the GATT connection.
    fn connect(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Discover `service` and return the UUIDs of its characteristics.
    fn discover(&self, service: Uuid, timeout: Duration) -> Result<Vec<Uuid>, TransportError>;

    /// Subscribe to notifications on `characteristic`.
    fn enable_notifications(
        &self,
        characteristic: Uuid,
        sink: GattEventSink,
    ) -> Result<(), TransportError>;

    /// Write `data` to `characteristic` and wait for the write confirmation.
    fn write(&self, characteristic: Uuid, data: &[u8], timeout: Duration)
        -> Result<(), TransportError>;

    /// Abort pending operations and drop the connection.
    fn disconnect(&self);
}

/// Transport over a BLE GATT service.
pub struct BleTransport {
    backend: Box<dyn GattBackend>,
    ids: DeviceIdentifiers,
    ready: AtomicBool,
    closed: AtomicBool,
    events_tx: Sender<GattEvent>,
    events_rx: Receiver<GattEvent>,
    // Dropping the sender wakes every blocked receive
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    // Tail of a notification longer than the caller's max_len
    pending: Mutex<Vec<u8>>,
}

impl BleTransport {
    /// Wrap a backend. The GATT handshake runs in [`Transport::open`].
    pub fn new(backend: Box<dyn GattBackend>, ids: DeviceIdentifiers) -> Self {
        let (events_tx, events_rx) = unbounded();
        let (close_tx, close_rx) = crossbeam_channel::bounded(0);
        Self {
            backend,
            ids,
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events_tx,
            events_rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn check_ready(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.ready.load(Ordering::Acquire) {
            return Err(TransportError::NotReady("gatt handshake not complete"));
        }
        Ok(())
    }

    /// Service discovery and notify subscription on a connected peripheral.
    fn handshake(&self, timeout: Duration) -> Result<(), TransportError> {
        let found = self.backend.discover(self.ids.service_uuid, timeout)?;
        if let Some(missing) = self
            .ids
            .required_characteristics()
            .into_iter()
            .find(|c| !found.contains(c))
        {
            return Err(TransportError::Handshake(format!(
                "characteristic {} missing from service {}",
                missing, self.ids.service_uuid
            )));
        }

        let tx = self.events_tx.clone();
        let sink: GattEventSink = Box::new(move |event| {
            // Receiver lives as long as the transport
            let _ = tx.send(event);
        });
        self.backend.enable_notifications(self.ids.notify_char, sink)
    }

    fn take_pending(&self, max_len: usize) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let n = pending.len().min(max_len);
        Some(pending.drain(..n).collect())
    }

    fn deliver(&self, mut data: Vec<u8>, max_len: usize) -> Vec<u8> {
        if data.len() > max_len {
            let tail = data.split_off(max_len);
            self.pending.lock().extend_from_slice(&tail);
        }
        data
    }
}

impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn open(&self, timeout: Duration) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        self.backend.connect(timeout)?;
        debug!("gatt connected, discovering {}", self.ids.service_uuid);

        // The link must not outlive a failed handshake
        if let Err(e) = self.handshake(timeout) {
            warn!("gatt handshake failed: {}", e);
            self.backend.disconnect();
            return Err(e);
        }

        self.ready.store(true, Ordering::Release);
        debug!("gatt handshake complete");
        Ok(())
    }

    fn send(&self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.check_ready()?;
        self.backend
            .write(self.ids.command_char, data, timeout)
            .inspect_err(|e| {
                if matches!(e, TransportError::DeviceGone) {
                    self.ready.store(false, Ordering::Release);
                }
            })?;
        trace!(len = data.len(), "gatt write confirmed");
        Ok(())
    }

    fn receive(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.check_ready()?;
        if let Some(data) = self.take_pending(max_len) {
            return Ok(data);
        }

        select! {
            recv(self.events_rx) -> event => match event {
                Ok(GattEvent::Notification(data)) => {
                    trace!(len = data.len(), "gatt notification");
                    Ok(self.deliver(data, max_len))
                }
                Ok(GattEvent::Disconnected) => {
                    warn!("peripheral disconnected");
                    self.ready.store(false, Ordering::Release);
                    Err(TransportError::DeviceGone)
                }
                Err(_) => Err(TransportError::Closed),
            },
            recv(self.close_rx) -> _ => Err(TransportError::Closed),
            default(timeout) => Err(TransportError::Timeout {
                operation: "gatt notification",
                timeout,
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready.store(false, Ordering::Release);
        self.close_tx.lock().take();
        self.backend.disconnect();
        debug!("ble transport closed");
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Peripheral {
        chars: Vec<Uuid>,
        discover_fails: bool,
        sink: Mutex<Option<GattEventSink>>,
        writes: Mutex<Vec<Vec<u8>>>,
        disconnected: AtomicBool,
    }

    impl Peripheral {
        fn notify(&self, event: GattEvent) {
            if let Some(sink) = self.sink.lock().as_ref() {
                sink(event);
            }
        }
    }

    struct MockGatt(Arc<Peripheral>);

    impl GattBackend for MockGatt {
        fn connect(&self, _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }

        fn discover(&self, _service: Uuid, _timeout: Duration) -> Result<Vec<Uuid>, TransportError> {
            if self.0.discover_fails {
                return Err(TransportError::Io("gatt error 0x85".to_string()));
            }
            Ok(self.0.chars.clone())
        }

        fn enable_notifications(
            &self,
            _characteristic: Uuid,
            sink: GattEventSink,
        ) -> Result<(), TransportError> {
            *self.0.sink.lock() = Some(sink);
            Ok(())
        }

        fn write(
            &self,
            _characteristic: Uuid,
            data: &[u8],
            _timeout: Duration,
        ) -> Result<(), TransportError> {
            self.0.writes.lock().push(data.to_vec());
            Ok(())
        }

        fn disconnect(&self) {
            self.0.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn full_peripheral() -> Arc<Peripheral> {
        Arc::new(Peripheral {
            chars: DeviceIdentifiers::default().required_characteristics().to_vec(),
            ..Default::default()
        })
    }

    fn transport(p: &Arc<Peripheral>) -> BleTransport {
        BleTransport::new(Box::new(MockGatt(p.clone())), DeviceIdentifiers::default())
    }

    #[test]
    fn test_send_receive_before_handshake() {
        let p = full_peripheral();
        let t = transport(&p);
        assert!(matches!(
            t.send(&[1], Duration::from_millis(10)),
            Err(TransportError::NotReady(_))
        ));
        assert!(matches!(
            t.receive(16, Duration::from_millis(10)),
            Err(TransportError::NotReady(_))
        ));
    }

    #[test]
    fn test_missing_characteristic_fails_handshake() {
        let p = Arc::new(Peripheral {
            chars: vec![DeviceIdentifiers::default().command_char],
            ..Default::default()
        });
        let t = transport(&p);
        assert!(matches!(
            t.open(Duration::from_secs(1)),
            Err(TransportError::Handshake(_))
        ));
        assert!(p.disconnected.load(Ordering::SeqCst));
        assert!(!t.is_open());
    }

    #[test]
    fn test_failed_discovery_disconnects() {
        let p = Arc::new(Peripheral {
            discover_fails: true,
            ..Default::default()
        });
        let t = transport(&p);
        assert!(matches!(
            t.open(Duration::from_secs(1)),
            Err(TransportError::Io(_))
        ));
        assert!(p.disconnected.load(Ordering::SeqCst));
        assert!(p.sink.lock().is_none());
        assert!(!t.is_open());
    }

    #[test]
    fn test_notification_roundtrip() {
        let p = full_peripheral();
        let t = transport(&p);
        t.open(Duration::from_secs(1)).expect("should complete handshake");

        t.send(&[0xAA, 0x55], Duration::from_secs(1)).unwrap();
        assert_eq!(p.writes.lock().len(), 1);

        p.notify(GattEvent::Notification(vec![1, 2, 3, 4, 5]));
        assert_eq!(t.receive(3, Duration::from_secs(1)).unwrap(), vec![1, 2, 3]);
        assert_eq!(t.receive(3, Duration::from_secs(1)).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_receive_times_out() {
        let p = full_peripheral();
        let t = transport(&p);
        t.open(Duration::from_secs(1)).unwrap();
        let start = Instant::now();
        assert!(matches!(
            t.receive(16, Duration::from_millis(50)),
            Err(TransportError::Timeout { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_peripheral_disconnect() {
        let p = full_peripheral();
        let t = transport(&p);
        t.open(Duration::from_secs(1)).unwrap();
        p.notify(GattEvent::Disconnected);
        assert_eq!(
            t.receive(16, Duration::from_secs(1)),
            Err(TransportError::DeviceGone)
        );
        assert!(!t.is_open());
    }

    #[test]
    fn test_close_wakes_blocked_receive() {
        let p = full_peripheral();
        let t = Arc::new(transport(&p));
        t.open(Duration::from_secs(1)).unwrap();

        let t2 = t.clone();
        let handle = thread::spawn(move || t2.receive(16, Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        t.close();

        let result = handle.join().expect("receiver thread should not panic");
        assert_eq!(result, Err(TransportError::Closed));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(p.disconnected.load(Ordering::SeqCst));
    }
}
