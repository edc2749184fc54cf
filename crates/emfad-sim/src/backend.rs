//! USB and GATT backends wired to a shared [`SimInstrument`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use emfad_transport::{
    DeviceIdentifiers, GattBackend, GattEvent, GattEventSink, TransportError, UsbBulkBackend,
};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::instrument::{Faults, SimConfig, SimInstrument};

type LinkDropHook = Box<dyn Fn() + Send + Sync>;

/// A simulated instrument shared by every backend opened on it.
pub struct SimDevice {
    instrument: Mutex<SimInstrument>,
    gone: AtomicBool,
    gatt_links: AtomicUsize,
    drop_hooks: Mutex<Vec<LinkDropHook>>,
}

impl SimDevice {
    /// Power on a simulated instrument.
    pub fn new(config: SimConfig) -> Arc<Self> {
        Arc::new(Self {
            instrument: Mutex::new(SimInstrument::new(config)),
            gone: AtomicBool::new(false),
            gatt_links: AtomicUsize::new(0),
            drop_hooks: Mutex::new(Vec::new()),
        })
    }

    /// Instrument configuration.
    pub fn config(&self) -> SimConfig {
        self.instrument.lock().config().clone()
    }

    /// Adjust pending faults.
    pub fn inject(&self, f: impl FnOnce(&mut Faults)) {
        f(self.instrument.lock().faults_mut());
    }

    /// Run `f` against the instrument state.
    pub fn with_instrument<R>(&self, f: impl FnOnce(&SimInstrument) -> R) -> R {
        f(&self.instrument.lock())
    }

    /// Opcodes received so far.
    pub fn received_commands(&self) -> Vec<u8> {
        self.instrument.lock().received_commands().to_vec()
    }

    /// Simulate the device being unplugged or going out of range.
    pub fn drop_connection(&self) {
        if self.gone.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("sim: connection dropped");
        for hook in self.drop_hooks.lock().iter() {
            hook();
        }
    }

    /// Whether the connection was dropped.
    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::Acquire)
    }

    /// GATT connections currently held by centrals.
    pub fn gatt_connections(&self) -> usize {
        self.gatt_links.load(Ordering::Acquire)
    }

    fn take_discovery_fault(&self) -> bool {
        let mut instrument = self.instrument.lock();
        let faults = instrument.faults_mut();
        if faults.fail_discovery == 0 {
            return false;
        }
        faults.fail_discovery -= 1;
        true
    }

    fn on_drop(&self, hook: LinkDropHook) {
        self.drop_hooks.lock().push(hook);
    }

    fn handle(&self, frame: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
        if self.is_gone() {
            return Err(TransportError::DeviceGone);
        }
        let delay = std::mem::take(&mut self.instrument.lock().faults_mut().delay_next_ms);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Ok(self.instrument.lock().handle(frame))
    }
}

// ============================================================================
// USB
// ============================================================================

enum UsbEvent {
    Data(Vec<u8>),
    Gone,
}

/// Bulk endpoint pair backed by a [`SimDevice`].
pub struct SimUsbBackend {
    device: Arc<SimDevice>,
    in_tx: Sender<UsbEvent>,
    in_rx: Receiver<UsbEvent>,
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
    pending: Mutex<Vec<u8>>,
}

impl SimUsbBackend {
    /// Create a backend for `device`.
    pub fn new(device: Arc<SimDevice>) -> Self {
        let (in_tx, in_rx) = unbounded();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
        Self {
            device,
            in_tx,
            in_rx,
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn split(&self, mut data: Vec<u8>, max_len: usize) -> Vec<u8> {
        if data.len() > max_len {
            let tail = data.split_off(max_len);
            self.pending.lock().extend_from_slice(&tail);
        }
        data
    }
}

impl UsbBulkBackend for SimUsbBackend {
    fn claim_interface(&self, _timeout: Duration) -> Result<(), TransportError> {
        if self.device.is_gone() {
            return Err(TransportError::DeviceGone);
        }
        let tx = self.in_tx.clone();
        self.device.on_drop(Box::new(move || {
            let _ = tx.send(UsbEvent::Gone);
        }));
        Ok(())
    }

    fn release_interface(&self) {}

    fn bulk_write(&self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        for reply in self.device.handle(data)? {
            let _ = self.in_tx.send(UsbEvent::Data(reply));
        }
        Ok(data.len())
    }

    fn bulk_read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        {
            let mut pending = self.pending.lock();
            if !pending.is_empty() {
                let n = pending.len().min(max_len);
                return Ok(pending.drain(..n).collect());
            }
        }
        select! {
            recv(self.in_rx) -> event => match event {
                Ok(UsbEvent::Data(data)) => Ok(self.split(data, max_len)),
                Ok(UsbEvent::Gone) | Err(_) => Err(TransportError::DeviceGone),
            },
            recv(self.cancel_rx) -> _ => Err(TransportError::Closed),
            default(timeout) => Err(TransportError::Timeout {
                operation: "bulk read",
                timeout,
            }),
        }
    }

    fn cancel(&self) {
        self.cancel_tx.lock().take();
    }
}

// ============================================================================
// BLE
// ============================================================================

/// GATT peripheral backed by a [`SimDevice`].
pub struct SimGattBackend {
    device: Arc<SimDevice>,
    ids: DeviceIdentifiers,
    mtu: usize,
    connected: AtomicBool,
    sink: Arc<Mutex<Option<GattEventSink>>>,
}

impl SimGattBackend {
    /// Create a backend for `device` advertising the characteristics in `ids`.
    pub fn new(device: Arc<SimDevice>, ids: DeviceIdentifiers) -> Self {
        let mtu = device.config().notify_mtu.max(1);
        Self {
            device,
            ids,
            mtu,
            connected: AtomicBool::new(false),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    fn notify(&self, event: GattEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink(event);
        }
    }
}

impl GattBackend for SimGattBackend {
    fn connect(&self, _timeout: Duration) -> Result<(), TransportError> {
        if self.device.is_gone() {
            return Err(TransportError::DeviceGone);
        }
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.device.gatt_links.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn discover(&self, service: Uuid, _timeout: Duration) -> Result<Vec<Uuid>, TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotReady("gatt not connected"));
        }
        if self.device.take_discovery_fault() {
            return Err(TransportError::Handshake("service discovery failed".to_string()));
        }
        if service != self.ids.service_uuid {
            return Err(TransportError::Handshake(format!(
                "service {} not found",
                service
            )));
        }
        Ok(self.ids.required_characteristics().to_vec())
    }

    fn enable_notifications(
        &self,
        characteristic: Uuid,
        sink: GattEventSink,
    ) -> Result<(), TransportError> {
        if characteristic != self.ids.notify_char {
            return Err(TransportError::Handshake(format!(
                "characteristic {} does not notify",
                characteristic
            )));
        }
        *self.sink.lock() = Some(sink);
        let shared = self.sink.clone();
        self.device.on_drop(Box::new(move || {
            if let Some(sink) = shared.lock().as_ref() {
                sink(GattEvent::Disconnected);
            }
        }));
        Ok(())
    }

    fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotReady("gatt not connected"));
        }
        if characteristic != self.ids.command_char {
            return Err(TransportError::Io(format!(
                "characteristic {} is not writable",
                characteristic
            )));
        }
        for reply in self.device.handle(data)? {
            for chunk in reply.chunks(self.mtu) {
                self.notify(GattEvent::Notification(chunk.to_vec()));
            }
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.device.gatt_links.fetch_sub(1, Ordering::AcqRel);
        }
        self.sink.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emfad_protocol::{decode_ack, Command, CMD_CONNECT};

    #[test]
    fn test_usb_roundtrip() {
        let device = SimDevice::new(SimConfig::default());
        let usb = SimUsbBackend::new(device.clone());
        usb.claim_interface(Duration::from_secs(1)).unwrap();

        let bytes = Command::Connect.encode();
        assert_eq!(usb.bulk_write(&bytes, Duration::from_secs(1)).unwrap(), bytes.len());
        let reply = usb.bulk_read(512, Duration::from_secs(1)).expect("should read reply");
        assert_eq!(decode_ack(&reply).unwrap().command, CMD_CONNECT);
        assert_eq!(device.received_commands(), vec![CMD_CONNECT]);
    }

    #[test]
    fn test_usb_read_timeout_and_cancel() {
        let device = SimDevice::new(SimConfig::default());
        let usb = SimUsbBackend::new(device);
        assert!(matches!(
            usb.bulk_read(64, Duration::from_millis(20)),
            Err(TransportError::Timeout { .. })
        ));
        usb.cancel();
        assert_eq!(
            usb.bulk_read(64, Duration::from_secs(5)),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_usb_drop_connection() {
        let device = SimDevice::new(SimConfig::default());
        let usb = SimUsbBackend::new(device.clone());
        usb.claim_interface(Duration::from_secs(1)).unwrap();
        device.drop_connection();
        assert_eq!(
            usb.bulk_read(64, Duration::from_secs(5)),
            Err(TransportError::DeviceGone)
        );
        assert_eq!(
            usb.bulk_write(&Command::ReadData.encode(), Duration::from_secs(1)),
            Err(TransportError::DeviceGone)
        );
    }

    #[test]
    fn test_gatt_fragments_notifications() {
        let device = SimDevice::new(SimConfig {
            notify_mtu: 8,
            ..Default::default()
        });
        let ids = DeviceIdentifiers::default();
        let gatt = SimGattBackend::new(device, ids.clone());
        gatt.connect(Duration::from_secs(1)).unwrap();

        let (tx, rx) = unbounded();
        gatt.enable_notifications(
            ids.notify_char,
            Box::new(move |e| {
                let _ = tx.send(e);
            }),
        )
        .unwrap();
        gatt.write(ids.command_char, &Command::ReadData.encode(), Duration::from_secs(1))
            .unwrap();

        // 31-byte signal frame in 8-byte notifications
        let chunks: Vec<GattEvent> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 4);
        let total: usize = chunks
            .iter()
            .map(|e| match e {
                GattEvent::Notification(d) => d.len(),
                GattEvent::Disconnected => 0,
            })
            .sum();
        assert_eq!(total, 31);
    }
}
