//! Wire-level properties of the EMFAD frame format.
//!
//! These tests exercise the public codec surface the way the device session
//! uses it: whole frames in, typed records or `DecodeError` out.

use approx::assert_relative_eq;
use emfad_protocol::*;

fn all_commands() -> Vec<Command> {
    let mut cmds = vec![
        Command::Connect,
        Command::Disconnect,
        Command::SetGain(1.0),
        Command::SetGain(-2.75),
        Command::SetOffset(0.125),
        Command::StartMeasurement {
            auto: false,
            interval_ms: 100,
        },
        Command::StartMeasurement {
            auto: true,
            interval_ms: u32::MAX,
        },
        Command::StopMeasurement,
        Command::ReadData,
        Command::Calibrate,
        Command::GetStatus,
        Command::GetVersion,
    ];
    cmds.extend(Frequency::ALL.iter().map(|f| Command::SetFrequency(*f)));
    cmds.extend(Mode::ALL.iter().map(|m| Command::SetMode(*m)));
    cmds
}

fn sample_status() -> DeviceStatus {
    DeviceStatus {
        battery_pct: 72,
        signal_quality: 88,
        temperature: 24.5,
        calibrated: true,
        firmware_version: 0x0203,
    }
}

// ============================================================================
// Command encoding
// ============================================================================

#[test]
fn test_every_command_validates() {
    for cmd in all_commands() {
        let bytes = cmd.encode();
        assert!(validate_checksum(&bytes), "{:?} failed validation", cmd);
        let frame = Frame::parse(&bytes).expect("should parse own encoding");
        assert_eq!(frame.command(), cmd.code());
        assert_eq!(frame.payload(), cmd.payload().as_slice());
    }
}

#[test]
fn test_command_opcodes() {
    let expected = [
        (Command::Connect, 0x01),
        (Command::Disconnect, 0x02),
        (Command::SetFrequency(Frequency::F19k), 0x03),
        (Command::SetMode(Mode::A), 0x04),
        (Command::SetGain(1.0), 0x05),
        (Command::SetOffset(0.0), 0x06),
        (
            Command::StartMeasurement {
                auto: false,
                interval_ms: 0,
            },
            0x10,
        ),
        (Command::StopMeasurement, 0x11),
        (Command::ReadData, 0x12),
        (Command::Calibrate, 0x20),
        (Command::GetStatus, 0x30),
        (Command::GetVersion, 0x31),
    ];
    for (cmd, code) in expected {
        assert_eq!(cmd.encode()[2], code, "{:?}", cmd);
    }
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn test_single_byte_flip_is_rejected() {
    let frames = vec![
        encode_signal(1234, 0.75, 45.0, 19000.0, 23.5),
        encode_status(&sample_status()),
    ];
    for original in frames {
        for i in 0..original.len() {
            for mask in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = original.clone();
                corrupted[i] ^= mask;
                assert!(
                    !validate_checksum(&corrupted),
                    "flip 0x{:02X} at {} still validates",
                    mask,
                    i
                );
                assert!(decode_signal(&corrupted).is_err() || original[2] != DATA_TYPE_SIGNAL);
                assert!(decode_status(&corrupted).is_err() || original[2] != DATA_TYPE_STATUS);
            }
        }
    }
}

#[test]
fn test_every_prefix_is_rejected() {
    let signal = encode_signal(99, 1.5, 10.0, 38000.0, 21.0);
    for end in 0..signal.len() {
        let prefix = &signal[..end];
        assert!(!validate_checksum(prefix));
        assert!(decode_signal(prefix).is_err(), "prefix of {} bytes decoded", end);
        assert!(Frame::parse(prefix).is_err());
    }

    let status = encode_status(&sample_status());
    for end in 0..status.len() {
        assert!(decode_status(&status[..end]).is_err());
    }
}

#[test]
fn test_checksum_error_reports_values() {
    let mut bytes = Command::ReadData.encode();
    let at = bytes.len() - 3;
    let good = bytes[at];
    bytes[at] = good ^ 0x01;
    assert_eq!(
        Frame::parse(&bytes),
        Err(DecodeError::ChecksumMismatch {
            computed: good,
            received: good ^ 0x01,
        })
    );
}

#[test]
fn test_markers_are_little_endian() {
    let bytes = Command::Connect.encode();
    assert_eq!(&bytes[..2], &PACKET_HEADER.to_le_bytes());
    assert_eq!(&bytes[..2], &[0x55, 0xAA]);
    assert_eq!(&bytes[bytes.len() - 2..], &[0xAA, 0x55]);

    // A frame as the instrument sends it
    let mut reply = vec![0x55, 0xAA, CMD_CONNECT, 0x01, RESP_OK];
    reply.push(xor_checksum(&reply));
    reply.extend_from_slice(&[0xAA, 0x55]);
    let ack = decode_ack(&reply).expect("instrument ack should decode");
    assert_eq!(ack.command, CMD_CONNECT);
    assert!(ack.code.is_ok());
}

#[test]
fn test_bad_markers() {
    let mut bytes = Command::GetStatus.encode();
    bytes[0] = 0xAA;
    bytes[1] = 0x55;
    assert_eq!(Frame::parse(&bytes), Err(DecodeError::BadHeader([0xAA, 0x55])));

    let mut bytes = Command::GetStatus.encode();
    let n = bytes.len();
    bytes[n - 1] = 0x00;
    assert_eq!(Frame::parse(&bytes), Err(DecodeError::BadFooter([0xAA, 0x00])));
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_signal_frame_fields() {
    // Hand-built frame: 55 AA 01 18 <24 payload bytes> <xor> AA 55
    let mut bytes = vec![0x55, 0xAA, 0x01, 0x18];
    bytes.extend_from_slice(&0i64.to_le_bytes());
    bytes.extend_from_slice(&0.75f32.to_le_bytes());
    bytes.extend_from_slice(&45.0f32.to_le_bytes());
    bytes.extend_from_slice(&19000.0f32.to_le_bytes());
    bytes.extend_from_slice(&23.5f32.to_le_bytes());
    bytes.push(xor_checksum(&bytes));
    bytes.extend_from_slice(&[0xAA, 0x55]);

    assert!(validate_checksum(&bytes));
    let t = decode_signal(&bytes).expect("should decode signal frame");
    assert_relative_eq!(t.signal_strength, 0.75);
    assert_relative_eq!(t.phase, 45.0);
    assert_relative_eq!(t.frequency, 19000.0);
    assert_relative_eq!(t.temperature, 23.5);
    assert!(t.is_valid());
}

#[test]
fn test_status_frame_fields() {
    let status = sample_status();
    let decoded = decode_status(&encode_status(&status)).expect("should decode status");
    assert_eq!(decoded.battery_pct, 72);
    assert_eq!(decoded.signal_quality, 88);
    assert_relative_eq!(decoded.temperature, 24.5);
    assert!(decoded.calibrated);
    assert_eq!(decoded.firmware_string(), "2.3");
}

#[test]
fn test_trailing_garbage_is_rejected() {
    let mut bytes = encode_signal(1, 1.0, 0.0, 19000.0, 20.0);
    bytes.extend_from_slice(&[0x55, 0xAA]);
    assert!(!validate_checksum(&bytes));
    assert!(matches!(
        decode_signal(&bytes),
        Err(DecodeError::FrameTooLong { .. })
    ));
}

// ============================================================================
// Streaming reassembly
// ============================================================================

#[test]
fn test_codec_reassembles_fragmented_stream() {
    let frames = vec![
        encode_ack(CMD_CONNECT, ResponseCode::Ok, &[]).unwrap(),
        encode_signal(7, 0.5, 1.0, 57000.0, 22.0),
        encode_status(&sample_status()),
    ];
    let stream: Vec<u8> = frames.iter().flatten().copied().collect();

    // 20-byte chunks, as a default BLE MTU would deliver them
    let mut codec = FrameCodec::new();
    let mut out = Vec::new();
    for chunk in stream.chunks(20) {
        codec.push(chunk);
        while let Some(frame) = codec.decode() {
            out.push(frame);
        }
    }

    assert_eq!(out, frames);
    assert!(decode_ack(&out[0]).unwrap().code.is_ok());
    assert_relative_eq!(decode_signal(&out[1]).unwrap().frequency, 57000.0);
    assert_eq!(decode_status(&out[2]).unwrap(), sample_status());
}
