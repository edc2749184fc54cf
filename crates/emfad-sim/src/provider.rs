//! Discovery of simulated instruments.

use std::sync::Arc;

use emfad_device::DeviceProvider;
use emfad_transport::{
    BleTransport, DeviceIdentifiers, RawDevice, Transport, TransportError, TransportKind,
    UsbTransport,
};

use crate::backend::{SimDevice, SimGattBackend, SimUsbBackend};

/// Provider that reports one simulated instrument for its link type.
///
/// Enumeration also returns an unrelated device so that identifier
/// filtering is exercised.
pub struct SimProvider {
    kind: TransportKind,
    device: Arc<SimDevice>,
    ids: DeviceIdentifiers,
    fail_enumeration: bool,
}

impl SimProvider {
    /// USB provider for `device`.
    pub fn usb(device: Arc<SimDevice>, ids: DeviceIdentifiers) -> Self {
        Self::new(TransportKind::Usb, device, ids)
    }

    /// BLE provider for `device`.
    pub fn ble(device: Arc<SimDevice>, ids: DeviceIdentifiers) -> Self {
        Self::new(TransportKind::Ble, device, ids)
    }

    fn new(kind: TransportKind, device: Arc<SimDevice>, ids: DeviceIdentifiers) -> Self {
        Self {
            kind,
            device,
            ids,
            fail_enumeration: false,
        }
    }

    /// Make enumeration fail, as a missing permission or a powered-off radio would.
    pub fn with_failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }
}

impl DeviceProvider for SimProvider {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn enumerate(&self) -> Result<Vec<RawDevice>, TransportError> {
        if self.fail_enumeration {
            return Err(TransportError::Io(format!("{} enumeration unavailable", self.kind)));
        }
        let config = self.device.config();
        Ok(match self.kind {
            TransportKind::Usb => vec![
                RawDevice::Usb {
                    path: "sim-usb-keyboard".to_string(),
                    vendor_id: 0x046D,
                    product_id: 0xC31C,
                    product: Some("Keyboard".to_string()),
                },
                RawDevice::Usb {
                    path: config.usb_path,
                    vendor_id: self.ids.vendor_id,
                    product_id: self.ids.product_id,
                    product: Some("EMFAD UG12 (simulated)".to_string()),
                },
            ],
            TransportKind::Ble => vec![
                RawDevice::Ble {
                    address: "SI:MU:LA:TE:FF:FF".to_string(),
                    name: Some("Headphones".to_string()),
                    rssi: Some(-70),
                },
                RawDevice::Ble {
                    address: config.ble_address,
                    name: Some(config.ble_name),
                    rssi: Some(-55),
                },
            ],
        })
    }

    fn transport(
        &self,
        device: &RawDevice,
        ids: &DeviceIdentifiers,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let config = self.device.config();
        let known = match device {
            RawDevice::Usb { path, .. } => self.kind == TransportKind::Usb && *path == config.usb_path,
            RawDevice::Ble { address, .. } => {
                self.kind == TransportKind::Ble && *address == config.ble_address
            }
        };
        if !known {
            return Err(TransportError::Io(format!(
                "no simulated device at {}",
                device.address()
            )));
        }
        Ok(match self.kind {
            TransportKind::Usb => Box::new(UsbTransport::new(Box::new(SimUsbBackend::new(
                self.device.clone(),
            )))),
            TransportKind::Ble => Box::new(BleTransport::new(
                Box::new(SimGattBackend::new(self.device.clone(), ids.clone())),
                ids.clone(),
            )),
        })
    }
}
