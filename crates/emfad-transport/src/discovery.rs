//! Raw discovery results reported by platform enumerators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// USB bulk transfer.
    Usb,
    /// Bluetooth Low Energy GATT.
    Ble,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => f.write_str("usb"),
            TransportKind::Ble => f.write_str("ble"),
        }
    }
}

/// A device as reported by a platform enumerator, before filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawDevice {
    /// Attached USB device.
    Usb {
        /// Platform device path or bus/address string.
        path: String,
        /// Vendor id from the device descriptor.
        vendor_id: u16,
        /// Product id from the device descriptor.
        product_id: u16,
        /// Product string, when readable.
        product: Option<String>,
    },
    /// BLE advertisement.
    Ble {
        /// Peripheral address.
        address: String,
        /// Advertised local name.
        name: Option<String>,
        /// Received signal strength in dBm.
        rssi: Option<i16>,
    },
}

impl RawDevice {
    /// Link type of this device.
    pub fn kind(&self) -> TransportKind {
        match self {
            RawDevice::Usb { .. } => TransportKind::Usb,
            RawDevice::Ble { .. } => TransportKind::Ble,
        }
    }

    /// Stable address used to open the device.
    pub fn address(&self) -> &str {
        match self {
            RawDevice::Usb { path, .. } => path,
            RawDevice::Ble { address, .. } => address,
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> String {
        match self {
            RawDevice::Usb { product, path, .. } => product
                .clone()
                .unwrap_or_else(|| format!("EMFAD USB ({})", path)),
            RawDevice::Ble { name, address, .. } => name
                .clone()
                .unwrap_or_else(|| format!("EMFAD BLE ({})", address)),
        }
    }
}
