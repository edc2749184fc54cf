//! Commands that can be sent to the instrument.

use crate::constants::*;
use crate::frame::Frame;
use crate::types::*;

/// Commands that can be sent to the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open the measurement link. First command after the transport opens.
    Connect,

    /// Close the measurement link.
    Disconnect,

    /// Select the excitation band.
    SetFrequency(Frequency),

    /// Select the coil mode.
    SetMode(Mode),

    /// Set receiver gain. Sent as `gain × 100`, truncated to i16.
    SetGain(f64),

    /// Set receiver offset. Sent as `offset × 1000`, truncated to i16.
    SetOffset(f64),

    /// Start a measurement run.
    StartMeasurement {
        /// Let the instrument sample on its own clock.
        auto: bool,
        /// Sampling interval in milliseconds.
        interval_ms: u32,
    },

    /// Stop the measurement run.
    StopMeasurement,

    /// Read one signal sample.
    ReadData,

    /// Run the calibration routine.
    Calibrate,

    /// Query the status report.
    GetStatus,

    /// Query the firmware version.
    GetVersion,
}

/// Fixed-point gain as the firmware expects it.
///
/// Saturates at the f64→i32 step and wraps at the i32→i16 step, so values
/// outside ±327.67 do not clamp.
pub fn gain_fixed_point(gain: f64) -> i16 {
    (gain * 100.0) as i32 as i16
}

/// Fixed-point offset as the firmware expects it. Same truncation as the gain.
pub fn offset_fixed_point(offset: f64) -> i16 {
    (offset * 1000.0) as i32 as i16
}

impl Command {
    /// Wire opcode.
    pub fn code(&self) -> u8 {
        match self {
            Command::Connect => CMD_CONNECT,
            Command::Disconnect => CMD_DISCONNECT,
            Command::SetFrequency(_) => CMD_SET_FREQUENCY,
            Command::SetMode(_) => CMD_SET_MODE,
            Command::SetGain(_) => CMD_SET_GAIN,
            Command::SetOffset(_) => CMD_SET_OFFSET,
            Command::StartMeasurement { .. } => CMD_START_MEASUREMENT,
            Command::StopMeasurement => CMD_STOP_MEASUREMENT,
            Command::ReadData => CMD_READ_DATA,
            Command::Calibrate => CMD_CALIBRATE,
            Command::GetStatus => CMD_GET_STATUS,
            Command::GetVersion => CMD_GET_VERSION,
        }
    }

    /// Short name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::SetFrequency(_) => "set_frequency",
            Command::SetMode(_) => "set_mode",
            Command::SetGain(_) => "set_gain",
            Command::SetOffset(_) => "set_offset",
            Command::StartMeasurement { .. } => "start_measurement",
            Command::StopMeasurement => "stop_measurement",
            Command::ReadData => "read_data",
            Command::Calibrate => "calibrate",
            Command::GetStatus => "get_status",
            Command::GetVersion => "get_version",
        }
    }

    /// Payload bytes (without framing).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::Connect => vec![PROTOCOL_VERSION],
            Command::SetFrequency(freq) => {
                let mut buf = Vec::with_capacity(4);
                buf.push(freq.code());
                buf.extend_from_slice(&freq.khz().to_le_bytes());
                buf.push(0x00);
                buf
            }
            Command::SetMode(mode) => vec![mode.code()],
            Command::SetGain(gain) => gain_fixed_point(*gain).to_le_bytes().to_vec(),
            Command::SetOffset(offset) => offset_fixed_point(*offset).to_le_bytes().to_vec(),
            Command::StartMeasurement { auto, interval_ms } => {
                let mut buf = Vec::with_capacity(5);
                buf.push(u8::from(*auto));
                buf.extend_from_slice(&interval_ms.to_le_bytes());
                buf
            }
            Command::Disconnect
            | Command::StopMeasurement
            | Command::ReadData
            | Command::Calibrate
            | Command::GetStatus
            | Command::GetVersion => Vec::new(),
        }
    }

    /// Kind of frame the instrument answers this command with.
    pub fn expected_reply(&self) -> ReplyKind {
        match self {
            Command::ReadData => ReplyKind::Signal,
            Command::GetStatus => ReplyKind::Status,
            _ => ReplyKind::Ack,
        }
    }

    /// Build the frame for this command.
    pub fn to_frame(&self) -> Frame {
        // Command payloads are at most 5 bytes
        Frame::from_parts(self.code(), self.payload())
    }

    /// Encode the command into a complete wire frame.
    pub fn encode(&self) -> Vec<u8> {
        self.to_frame().encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame() {
        let bytes = Command::Connect.encode();
        assert_eq!(bytes, vec![0x55, 0xAA, 0x01, 0x01, 0x01, 0xFE, 0xAA, 0x55]);
    }

    #[test]
    fn test_set_frequency_payload() {
        assert_eq!(
            Command::SetFrequency(Frequency::F19k).payload(),
            vec![0x01, 19, 0x00, 0x00]
        );
        assert_eq!(
            Command::SetFrequency(Frequency::F135k).payload(),
            vec![0x07, 135, 0x00, 0x00]
        );
    }

    #[test]
    fn test_gain_truncation() {
        assert_eq!(gain_fixed_point(1.0), 100);
        assert_eq!(gain_fixed_point(1.239), 123);
        assert_eq!(gain_fixed_point(-0.5), -50);
        // Out of i16 range wraps rather than clamps
        assert_eq!(gain_fixed_point(400.0), (40_000i32) as i16);
        assert_eq!(offset_fixed_point(0.0125), 12);
        assert_eq!(Command::SetGain(2.5).payload(), 250i16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_start_measurement_payload() {
        let cmd = Command::StartMeasurement {
            auto: true,
            interval_ms: 1000,
        };
        assert_eq!(cmd.payload(), vec![0x01, 0xE8, 0x03, 0x00, 0x00]);
        assert_eq!(cmd.code(), CMD_START_MEASUREMENT);
    }

    #[test]
    fn test_expected_reply() {
        assert_eq!(Command::ReadData.expected_reply(), ReplyKind::Signal);
        assert_eq!(Command::GetStatus.expected_reply(), ReplyKind::Status);
        assert_eq!(Command::Calibrate.expected_reply(), ReplyKind::Ack);
    }
}
