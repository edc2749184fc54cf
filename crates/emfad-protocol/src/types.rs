//! Common types used in the protocol.

use std::fmt;

use crate::constants::*;
use crate::error::DecodeError;

// ============================================================================
// Frequency bands
// ============================================================================

/// Excitation frequency band. The instrument only supports these seven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Frequency {
    /// 19 kHz.
    #[default]
    F19k,
    /// 38 kHz.
    F38k,
    /// 57 kHz.
    F57k,
    /// 76 kHz.
    F76k,
    /// 95 kHz.
    F95k,
    /// 114 kHz.
    F114k,
    /// 135 kHz.
    F135k,
}

impl Frequency {
    /// All bands in ascending order.
    pub const ALL: [Frequency; 7] = [
        Frequency::F19k,
        Frequency::F38k,
        Frequency::F57k,
        Frequency::F76k,
        Frequency::F95k,
        Frequency::F114k,
        Frequency::F135k,
    ];

    /// Band frequency in kHz.
    pub fn khz(self) -> u16 {
        match self {
            Frequency::F19k => 19,
            Frequency::F38k => 38,
            Frequency::F57k => 57,
            Frequency::F76k => 76,
            Frequency::F95k => 95,
            Frequency::F114k => 114,
            Frequency::F135k => 135,
        }
    }

    /// Band frequency in Hz.
    pub fn hz(self) -> f64 {
        f64::from(self.khz()) * 1000.0
    }

    /// Wire code, 0x01 for 19 kHz through 0x07 for 135 kHz.
    pub fn code(self) -> u8 {
        match self {
            Frequency::F19k => 0x01,
            Frequency::F38k => 0x02,
            Frequency::F57k => 0x03,
            Frequency::F76k => 0x04,
            Frequency::F95k => 0x05,
            Frequency::F114k => 0x06,
            Frequency::F135k => 0x07,
        }
    }

    /// Look up a band by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    /// Look up a band by exact kHz value.
    pub fn from_khz(khz: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.khz() == khz)
    }

    /// Closest band to an arbitrary frequency reading in Hz.
    ///
    /// Non-finite readings map to the lowest band.
    pub fn nearest(hz: f64) -> Self {
        if !hz.is_finite() {
            return Frequency::F19k;
        }
        let mut best = Frequency::F19k;
        let mut best_dist = f64::INFINITY;
        for f in Self::ALL {
            let dist = (f.hz() - hz).abs();
            if dist < best_dist {
                best = f;
                best_dist = dist;
            }
        }
        best
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kHz", self.khz())
    }
}

// ============================================================================
// Coil modes
// ============================================================================

/// Coil measurement mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Coil A alone.
    #[default]
    A,
    /// Coil A minus coil B.
    AMinusB,
    /// Coil B alone.
    B,
    /// Coil B minus coil A.
    BMinusA,
}

impl Mode {
    /// All modes in wire-code order.
    pub const ALL: [Mode; 4] = [Mode::A, Mode::AMinusB, Mode::B, Mode::BMinusA];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Mode::A => 0x01,
            Mode::AMinusB => 0x02,
            Mode::B => 0x03,
            Mode::BMinusA => 0x04,
        }
    }

    /// Look up a mode by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.code() == code)
    }

    /// Short label as printed on the instrument.
    pub fn label(self) -> &'static str {
        match self {
            Mode::A => "A",
            Mode::AMinusB => "A-B",
            Mode::B => "B",
            Mode::BMinusA => "B-A",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Mode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Mode::A),
            "A-B" | "AMINUSB" => Ok(Mode::AMinusB),
            "B" => Ok(Mode::B),
            "B-A" | "BMINUSA" => Ok(Mode::BMinusA),
            other => Err(DecodeError::InvalidData(format!("unknown mode: {}", other))),
        }
    }
}

// ============================================================================
// Decoded records
// ============================================================================

/// One signal sample as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawTelemetry {
    /// Device timestamp in milliseconds.
    pub timestamp: i64,
    /// Signal strength, non-negative.
    pub signal_strength: f64,
    /// Phase in degrees.
    pub phase: f64,
    /// Frequency the sample was taken at, in Hz.
    pub frequency: f64,
    /// Probe temperature in °C.
    pub temperature: f64,
    valid: bool,
}

impl RawTelemetry {
    /// Only the decoder marks a sample valid.
    pub(crate) fn decoded(
        timestamp: i64,
        signal_strength: f64,
        phase: f64,
        frequency: f64,
        temperature: f64,
    ) -> Self {
        RawTelemetry {
            timestamp,
            signal_strength,
            phase,
            frequency,
            temperature,
            valid: true,
        }
    }

    /// Whether this sample came out of a successful decode.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Instrument status report.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    /// Battery charge in percent.
    pub battery_pct: u8,
    /// Link quality in percent.
    pub signal_quality: u8,
    /// Internal temperature in °C.
    pub temperature: f64,
    /// Whether the probe has a valid calibration.
    pub calibrated: bool,
    /// Firmware version word.
    pub firmware_version: u16,
}

impl DeviceStatus {
    /// Firmware version as `major.minor`.
    pub fn firmware_string(&self) -> String {
        format!(
            "{}.{}",
            self.firmware_version >> 8,
            self.firmware_version & 0xFF
        )
    }
}

/// Frequency sweep reported by the instrument.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumRaw {
    /// Point frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// Point amplitudes.
    pub amplitudes: Vec<f64>,
}

impl SpectrumRaw {
    /// Build from paired vectors. Fails if the lengths differ.
    pub fn new(frequencies: Vec<f64>, amplitudes: Vec<f64>) -> Result<Self, DecodeError> {
        if frequencies.len() != amplitudes.len() {
            return Err(DecodeError::InvalidData(format!(
                "spectrum has {} frequencies but {} amplitudes",
                frequencies.len(),
                amplitudes.len()
            )));
        }
        if frequencies.len() > MAX_SPECTRUM_POINTS {
            return Err(DecodeError::PayloadTooLong {
                max: MAX_SPECTRUM_POINTS,
                actual: frequencies.len(),
            });
        }
        Ok(SpectrumRaw {
            frequencies,
            amplitudes,
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// Whether the sweep is empty.
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

// ============================================================================
// Acknowledgements
// ============================================================================

/// Response code carried in an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseCode {
    /// Command accepted.
    Ok,
    /// Generic failure.
    Error,
    /// Unknown opcode.
    InvalidCommand,
    /// Device busy.
    DeviceBusy,
    /// Calibration required first.
    CalibrationRequired,
    /// Code outside the documented set.
    Unknown(u8),
}

impl ResponseCode {
    /// Wire value.
    pub fn code(self) -> u8 {
        match self {
            ResponseCode::Ok => RESP_OK,
            ResponseCode::Error => RESP_ERROR,
            ResponseCode::InvalidCommand => RESP_INVALID_COMMAND,
            ResponseCode::DeviceBusy => RESP_DEVICE_BUSY,
            ResponseCode::CalibrationRequired => RESP_CALIBRATION_REQUIRED,
            ResponseCode::Unknown(c) => c,
        }
    }

    /// Whether the command was accepted.
    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            RESP_OK => ResponseCode::Ok,
            RESP_ERROR => ResponseCode::Error,
            RESP_INVALID_COMMAND => ResponseCode::InvalidCommand,
            RESP_DEVICE_BUSY => ResponseCode::DeviceBusy,
            RESP_CALIBRATION_REQUIRED => ResponseCode::CalibrationRequired,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Ok => f.write_str("OK"),
            ResponseCode::Error => f.write_str("ERROR"),
            ResponseCode::InvalidCommand => f.write_str("INVALID_COMMAND"),
            ResponseCode::DeviceBusy => f.write_str("DEVICE_BUSY"),
            ResponseCode::CalibrationRequired => f.write_str("CALIBRATION_REQUIRED"),
            ResponseCode::Unknown(c) => write!(f, "UNKNOWN(0x{:02X})", c),
        }
    }
}

/// Acknowledgement of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Opcode being acknowledged.
    pub command: u8,
    /// Result code.
    pub code: ResponseCode,
    /// Any bytes following the code (e.g. a version word for GetVersion).
    pub data: Vec<u8>,
}

/// Kind of reply a command expects. Replies are matched against the request
/// because data-type tags and opcodes share the same byte space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Acknowledgement echoing the opcode.
    Ack,
    /// Signal sample.
    Signal,
    /// Status report.
    Status,
    /// Calibration report.
    Calibration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_codes() {
        for (i, f) in Frequency::ALL.iter().enumerate() {
            assert_eq!(f.code(), i as u8 + 1);
            assert_eq!(Frequency::from_code(f.code()), Some(*f));
        }
        assert_eq!(Frequency::from_code(0), None);
        assert_eq!(Frequency::from_code(8), None);
        assert_eq!(Frequency::F135k.hz(), 135_000.0);
    }

    #[test]
    fn test_frequency_nearest() {
        assert_eq!(Frequency::nearest(19_000.0), Frequency::F19k);
        assert_eq!(Frequency::nearest(0.0), Frequency::F19k);
        assert_eq!(Frequency::nearest(50_000.0), Frequency::F57k);
        assert_eq!(Frequency::nearest(1.0e9), Frequency::F135k);
        assert_eq!(Frequency::nearest(f64::NAN), Frequency::F19k);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("a-b".parse::<Mode>().unwrap(), Mode::AMinusB);
        assert_eq!("B".parse::<Mode>().unwrap(), Mode::B);
        assert!("C".parse::<Mode>().is_err());
        assert_eq!(Mode::BMinusA.to_string(), "B-A");
    }

    #[test]
    fn test_response_code_roundtrip() {
        for code in [0x00, 0xFF, 0xFE, 0xFD, 0xFC, 0x42] {
            assert_eq!(ResponseCode::from(code).code(), code);
        }
        assert!(ResponseCode::from(RESP_OK).is_ok());
        assert_eq!(ResponseCode::from(0x42), ResponseCode::Unknown(0x42));
    }

    #[test]
    fn test_spectrum_raw_length_check() {
        assert!(SpectrumRaw::new(vec![1.0, 2.0], vec![0.5]).is_err());
        let s = SpectrumRaw::new(vec![1.0], vec![0.5]).expect("should build");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_firmware_string() {
        let status = DeviceStatus {
            battery_pct: 80,
            signal_quality: 90,
            temperature: 21.0,
            calibrated: true,
            firmware_version: 0x0203,
        };
        assert_eq!(status.firmware_string(), "2.3");
    }
}
