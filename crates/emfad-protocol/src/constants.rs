//! Protocol constants
//!
//! Frame markers, command opcodes, data-type tags, and response codes used by
//! the EMFAD instrument firmware.

// ============================================================================
// Framing
// ============================================================================

/// Frame header marker. Written to the wire little-endian (`55 AA`).
pub const PACKET_HEADER: u16 = 0xAA55;
/// Frame footer marker. Written to the wire little-endian (`AA 55`).
pub const PACKET_FOOTER: u16 = 0x55AA;
/// Header bytes as they appear on the wire.
pub const HEADER_BYTES: [u8; 2] = PACKET_HEADER.to_le_bytes();
/// Footer bytes as they appear on the wire.
pub const FOOTER_BYTES: [u8; 2] = PACKET_FOOTER.to_le_bytes();

/// Bytes preceding the payload: header (2) + command (1) + length (1).
pub const FRAME_PREFIX_LEN: usize = 4;
/// Bytes following the payload: checksum (1) + footer (2).
pub const FRAME_SUFFIX_LEN: usize = 3;
/// Total framing overhead around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_PREFIX_LEN + FRAME_SUFFIX_LEN;
/// Largest payload expressible by the one-byte length field.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
/// Largest complete frame.
pub const MAX_PACKET_SIZE: usize = FRAME_OVERHEAD + MAX_PAYLOAD_LEN;

/// Protocol version announced in the Connect payload.
pub const PROTOCOL_VERSION: u8 = 0x01;

// ============================================================================
// Command Codes (host → instrument)
// ============================================================================

/// Open a measurement link.
pub const CMD_CONNECT: u8 = 0x01;
/// Close the measurement link.
pub const CMD_DISCONNECT: u8 = 0x02;
/// Select the excitation frequency band.
pub const CMD_SET_FREQUENCY: u8 = 0x03;
/// Select the coil mode (A, A-B, B, B-A).
pub const CMD_SET_MODE: u8 = 0x04;
/// Set receiver gain (fixed point, ×100).
pub const CMD_SET_GAIN: u8 = 0x05;
/// Set receiver offset (fixed point, ×1000).
pub const CMD_SET_OFFSET: u8 = 0x06;
/// Start a measurement run.
pub const CMD_START_MEASUREMENT: u8 = 0x10;
/// Stop the measurement run.
pub const CMD_STOP_MEASUREMENT: u8 = 0x11;
/// Read one signal sample.
pub const CMD_READ_DATA: u8 = 0x12;
/// Run the calibration routine.
pub const CMD_CALIBRATE: u8 = 0x20;
/// Query battery, temperature, and firmware status.
pub const CMD_GET_STATUS: u8 = 0x30;
/// Query the firmware version.
pub const CMD_GET_VERSION: u8 = 0x31;

// ============================================================================
// Data Types (instrument → host)
// ============================================================================

/// Signal sample frame.
pub const DATA_TYPE_SIGNAL: u8 = 0x01;
/// Spectrum sweep frame.
pub const DATA_TYPE_SPECTRUM: u8 = 0x02;
/// Device status frame.
pub const DATA_TYPE_STATUS: u8 = 0x03;
/// Calibration report frame.
pub const DATA_TYPE_CALIBRATION: u8 = 0x04;

// ============================================================================
// Response Codes
// ============================================================================

/// Command accepted.
pub const RESP_OK: u8 = 0x00;
/// Generic failure.
pub const RESP_ERROR: u8 = 0xFF;
/// Opcode not recognized by the firmware.
pub const RESP_INVALID_COMMAND: u8 = 0xFE;
/// Instrument busy with a previous operation.
pub const RESP_DEVICE_BUSY: u8 = 0xFD;
/// Calibration must run before this command.
pub const RESP_CALIBRATION_REQUIRED: u8 = 0xFC;

// ============================================================================
// Payload Sizes
// ============================================================================

/// Signal payload: timestamp (8) + four f32 fields (16).
pub const SIGNAL_PAYLOAD_LEN: usize = 24;
/// Status payload: battery, quality, temperature (4), calibrated, firmware (2).
pub const STATUS_PAYLOAD_LEN: usize = 9;
/// Spectrum payload header: point count (2).
pub const SPECTRUM_HEADER_LEN: usize = 2;
/// Bytes per spectrum point: frequency (4) + amplitude (4).
pub const SPECTRUM_POINT_LEN: usize = 8;
/// Most spectrum points that fit one frame.
pub const MAX_SPECTRUM_POINTS: usize = (MAX_PAYLOAD_LEN - SPECTRUM_HEADER_LEN) / SPECTRUM_POINT_LEN;
