//! Responses from the instrument.
//!
//! Decoders take one complete frame (as yielded by [`FrameCodec`](crate::FrameCodec)
//! or received whole) and either return a fully typed record or a
//! [`DecodeError`]. Nothing is ever partially decoded.
//!
//! The encoders at the bottom build device-side frames. They exist for the
//! simulated instrument and for tests.

use crate::constants::*;
use crate::error::*;
use crate::frame::Frame;
use crate::types::*;

/// Responses received from the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Signal sample.
    Signal(RawTelemetry),

    /// Frequency sweep.
    Spectrum(SpectrumRaw),

    /// Status report.
    Status(DeviceStatus),

    /// Calibration report. The layout is firmware specific; kept opaque.
    Calibration(Vec<u8>),

    /// Command acknowledgement.
    Ack(Ack),
}

impl Response {
    /// Decode a frame as the reply kind a request expects.
    pub fn decode(bytes: &[u8], expected: ReplyKind) -> Result<Self, DecodeError> {
        match expected {
            ReplyKind::Signal => decode_signal(bytes).map(Response::Signal),
            ReplyKind::Status => decode_status(bytes).map(Response::Status),
            ReplyKind::Ack => decode_ack(bytes).map(Response::Ack),
            ReplyKind::Calibration => {
                parse_typed(bytes, DATA_TYPE_CALIBRATION).map(|f| Response::Calibration(f.into_payload()))
            }
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Signal(_) => "signal",
            Response::Spectrum(_) => "spectrum",
            Response::Status(_) => "status",
            Response::Calibration(_) => "calibration",
            Response::Ack(_) => "ack",
        }
    }
}

/// Decode a frame without knowing which request it answers.
///
/// Data-type tags overlap the low opcodes, so the tag alone is ambiguous. A
/// frame is read as data when its tag and payload size match a data layout,
/// and as an acknowledgement otherwise. Request/response traffic should use
/// [`Response::decode`] with the expected kind instead.
pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    let frame = Frame::parse(bytes)?;
    let len = frame.payload().len();
    match frame.command() {
        DATA_TYPE_SIGNAL if len == SIGNAL_PAYLOAD_LEN => decode_signal(bytes).map(Response::Signal),
        DATA_TYPE_STATUS if len == STATUS_PAYLOAD_LEN => decode_status(bytes).map(Response::Status),
        DATA_TYPE_SPECTRUM if len >= SPECTRUM_HEADER_LEN && spectrum_len_matches(frame.payload()) => {
            decode_spectrum(bytes).map(Response::Spectrum)
        }
        DATA_TYPE_CALIBRATION if len != 1 => Ok(Response::Calibration(frame.into_payload())),
        _ => ack_from_frame(frame).map(Response::Ack),
    }
}

fn spectrum_len_matches(payload: &[u8]) -> bool {
    let count = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    payload.len() == SPECTRUM_HEADER_LEN + count * SPECTRUM_POINT_LEN
}

/// Parse a frame and check its data-type tag.
fn parse_typed(bytes: &[u8], data_type: u8) -> Result<Frame, DecodeError> {
    let frame = Frame::parse(bytes)?;
    if frame.command() != data_type {
        return Err(DecodeError::UnexpectedType {
            expected: data_type,
            actual: frame.command(),
        });
    }
    Ok(frame)
}

fn check_min_len(bytes: &[u8], payload_len: usize) -> Result<(), DecodeError> {
    let expected = FRAME_OVERHEAD + payload_len;
    if bytes.len() < expected {
        return Err(DecodeError::FrameTooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn check_payload_len(data_type: u8, payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() != expected {
        return Err(DecodeError::PayloadLength {
            data_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decode a Signal frame.
pub fn decode_signal(bytes: &[u8]) -> Result<RawTelemetry, DecodeError> {
    check_min_len(bytes, SIGNAL_PAYLOAD_LEN)?;
    let frame = parse_typed(bytes, DATA_TYPE_SIGNAL)?;
    let p = frame.payload();
    check_payload_len(DATA_TYPE_SIGNAL, p, SIGNAL_PAYLOAD_LEN)?;

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&p[0..8]);
    let timestamp = i64::from_le_bytes(ts);
    let signal = f64::from(read_f32(p, 8));
    let phase = f64::from(read_f32(p, 12));
    let frequency = f64::from(read_f32(p, 16));
    let temperature = f64::from(read_f32(p, 20));

    if !signal.is_finite() || signal < 0.0 {
        return Err(DecodeError::InvalidData(format!(
            "signal strength out of range: {}",
            signal
        )));
    }
    if !frequency.is_finite() || frequency < 0.0 {
        return Err(DecodeError::InvalidData(format!(
            "frequency out of range: {}",
            frequency
        )));
    }

    log::trace!(
        "decoded signal ts={} signal={} phase={} freq={}",
        timestamp,
        signal,
        phase,
        frequency
    );

    Ok(RawTelemetry::decoded(
        timestamp,
        signal,
        phase,
        frequency,
        temperature,
    ))
}

/// Decode a Spectrum frame.
pub fn decode_spectrum(bytes: &[u8]) -> Result<SpectrumRaw, DecodeError> {
    check_min_len(bytes, SPECTRUM_HEADER_LEN)?;
    let frame = parse_typed(bytes, DATA_TYPE_SPECTRUM)?;
    let p = frame.payload();
    if p.len() < SPECTRUM_HEADER_LEN {
        return Err(DecodeError::PayloadLength {
            data_type: DATA_TYPE_SPECTRUM,
            expected: SPECTRUM_HEADER_LEN,
            actual: p.len(),
        });
    }

    let count = u16::from_le_bytes([p[0], p[1]]) as usize;
    check_payload_len(
        DATA_TYPE_SPECTRUM,
        p,
        SPECTRUM_HEADER_LEN + count * SPECTRUM_POINT_LEN,
    )?;

    let mut frequencies = Vec::with_capacity(count);
    let mut amplitudes = Vec::with_capacity(count);
    for point in p[SPECTRUM_HEADER_LEN..].chunks_exact(SPECTRUM_POINT_LEN) {
        frequencies.push(f64::from(read_f32(point, 0)));
        amplitudes.push(f64::from(read_f32(point, 4)));
    }

    SpectrumRaw::new(frequencies, amplitudes)
}

/// Decode a Status frame.
pub fn decode_status(bytes: &[u8]) -> Result<DeviceStatus, DecodeError> {
    check_min_len(bytes, STATUS_PAYLOAD_LEN)?;
    let frame = parse_typed(bytes, DATA_TYPE_STATUS)?;
    let p = frame.payload();
    check_payload_len(DATA_TYPE_STATUS, p, STATUS_PAYLOAD_LEN)?;

    let battery_pct = p[0];
    if battery_pct > 100 {
        log::warn!("status reports battery at {}%", battery_pct);
    }

    Ok(DeviceStatus {
        battery_pct,
        signal_quality: p[1],
        temperature: f64::from(read_f32(p, 2)),
        calibrated: p[6] != 0,
        firmware_version: u16::from_le_bytes([p[7], p[8]]),
    })
}

/// Decode an acknowledgement frame.
pub fn decode_ack(bytes: &[u8]) -> Result<Ack, DecodeError> {
    check_min_len(bytes, 1)?;
    ack_from_frame(Frame::parse(bytes)?)
}

fn ack_from_frame(frame: Frame) -> Result<Ack, DecodeError> {
    let command = frame.command();
    let payload = frame.into_payload();
    let (code, data) = payload.split_first().ok_or(DecodeError::PayloadLength {
        data_type: command,
        expected: 1,
        actual: 0,
    })?;
    Ok(Ack {
        command,
        code: ResponseCode::from(*code),
        data: data.to_vec(),
    })
}

// ============================================================================
// Device-side encoders
// ============================================================================

/// Encode a Signal frame.
pub fn encode_signal(
    timestamp: i64,
    signal: f32,
    phase: f32,
    frequency: f32,
    temperature: f32,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SIGNAL_PAYLOAD_LEN);
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&signal.to_le_bytes());
    payload.extend_from_slice(&phase.to_le_bytes());
    payload.extend_from_slice(&frequency.to_le_bytes());
    payload.extend_from_slice(&temperature.to_le_bytes());
    Frame::from_parts(DATA_TYPE_SIGNAL, payload).encode()
}

/// Encode a Status frame.
pub fn encode_status(status: &DeviceStatus) -> Vec<u8> {
    let mut payload = Vec::with_capacity(STATUS_PAYLOAD_LEN);
    payload.push(status.battery_pct);
    payload.push(status.signal_quality);
    payload.extend_from_slice(&(status.temperature as f32).to_le_bytes());
    payload.push(u8::from(status.calibrated));
    payload.extend_from_slice(&status.firmware_version.to_le_bytes());
    Frame::from_parts(DATA_TYPE_STATUS, payload).encode()
}

/// Encode a Spectrum frame. Fails when the sweep does not fit one frame.
pub fn encode_spectrum(spectrum: &SpectrumRaw) -> Result<Vec<u8>, DecodeError> {
    let checked = SpectrumRaw::new(spectrum.frequencies.clone(), spectrum.amplitudes.clone())?;
    let mut payload =
        Vec::with_capacity(SPECTRUM_HEADER_LEN + checked.len() * SPECTRUM_POINT_LEN);
    payload.extend_from_slice(&(checked.len() as u16).to_le_bytes());
    for (f, a) in checked.frequencies.iter().zip(&checked.amplitudes) {
        payload.extend_from_slice(&(*f as f32).to_le_bytes());
        payload.extend_from_slice(&(*a as f32).to_le_bytes());
    }
    Ok(Frame::new(DATA_TYPE_SPECTRUM, payload)?.encode())
}

/// Encode an acknowledgement of `command`.
pub fn encode_ack(command: u8, code: ResponseCode, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut payload = Vec::with_capacity(1 + data.len());
    payload.push(code.code());
    payload.extend_from_slice(data);
    Ok(Frame::new(command, payload)?.encode())
}
