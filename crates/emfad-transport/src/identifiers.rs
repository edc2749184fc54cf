//! Device identifiers used for discovery and the GATT handshake.
//!
//! The default values are placeholders until the vendor publishes the real
//! ones; every field can be overridden from configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default USB vendor id.
pub const DEFAULT_VENDOR_ID: u16 = 0x1234;
/// Default USB product id.
pub const DEFAULT_PRODUCT_ID: u16 = 0x5678;
/// Default BLE primary service.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc);
/// Default command (write) characteristic.
pub const DEFAULT_COMMAND_CHAR_UUID: Uuid =
    Uuid::from_u128(0x12345678_1234_1234_1234_123456789abd);
/// Default data characteristic.
pub const DEFAULT_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abe);
/// Default notification characteristic.
pub const DEFAULT_NOTIFY_CHAR_UUID: Uuid =
    Uuid::from_u128(0x12345678_1234_1234_1234_123456789abf);
/// Advertised name prefix of EMFAD instruments.
pub const DEFAULT_NAME_PREFIX: &str = "EMFAD";

/// USB and BLE identifiers of an EMFAD instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentifiers {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// BLE primary service UUID.
    pub service_uuid: Uuid,
    /// Characteristic commands are written to.
    pub command_char: Uuid,
    /// Characteristic carrying bulk data.
    pub data_char: Uuid,
    /// Characteristic replies are notified on.
    pub notify_char: Uuid,
    /// Advertised BLE name prefix.
    pub name_prefix: String,
}

impl Default for DeviceIdentifiers {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            service_uuid: DEFAULT_SERVICE_UUID,
            command_char: DEFAULT_COMMAND_CHAR_UUID,
            data_char: DEFAULT_DATA_CHAR_UUID,
            notify_char: DEFAULT_NOTIFY_CHAR_UUID,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl DeviceIdentifiers {
    /// Whether a USB descriptor belongs to an EMFAD instrument.
    pub fn matches_usb(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && product_id == self.product_id
    }

    /// Whether an advertised BLE name belongs to an EMFAD instrument.
    pub fn matches_ble_name(&self, name: Option<&str>) -> bool {
        name.is_some_and(|n| n.starts_with(&self.name_prefix))
    }

    /// The three characteristics the handshake must find.
    pub fn required_characteristics(&self) -> [Uuid; 3] {
        [self.command_char, self.data_char, self.notify_char]
    }

    /// Set the USB vendor and product ids.
    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Set the BLE name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uuids() {
        let ids = DeviceIdentifiers::default();
        assert_eq!(
            ids.service_uuid.to_string(),
            "12345678-1234-1234-1234-123456789abc"
        );
        assert_eq!(
            ids.notify_char.to_string(),
            "12345678-1234-1234-1234-123456789abf"
        );
    }

    #[test]
    fn test_matching() {
        let ids = DeviceIdentifiers::default();
        assert!(ids.matches_usb(0x1234, 0x5678));
        assert!(!ids.matches_usb(0x1234, 0x0001));
        assert!(ids.matches_ble_name(Some("EMFAD-UG12")));
        assert!(!ids.matches_ble_name(Some("Headphones")));
        assert!(!ids.matches_ble_name(None));
    }

    #[test]
    fn test_yaml_override() {
        let ids: DeviceIdentifiers =
            serde_yaml::from_str("vendor_id: 4660\nname_prefix: UG\n").expect("should parse");
        assert_eq!(ids.vendor_id, 0x1234);
        assert_eq!(ids.product_id, DEFAULT_PRODUCT_ID);
        assert_eq!(ids.name_prefix, "UG");
    }
}
