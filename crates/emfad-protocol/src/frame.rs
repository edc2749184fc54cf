//! `0xAA55` / `0x55AA` framing and stream reassembly.
//!
//! Every message exchanged with the instrument is wrapped in the same frame:
//!
//! ```text
//! +------+------+-----+-----+----------------+----------+------+------+
//! | 0xAA | 0x55 | cmd | len | payload[0..len] | checksum | 0x55 | 0xAA |
//! +------+------+-----+-----+----------------+----------+------+------+
//! ```
//!
//! The checksum is the XOR of every byte from the header through the payload.

use bytes::{Buf, BytesMut};

use crate::constants::*;
use crate::error::DecodeError;

/// Buffer limit for the streaming reassembler.
pub const MAX_BUFFERED_SIZE: usize = 1024;

/// XOR fold over a byte slice.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Fold all bytes except the last and compare against the last one.
///
/// `region` is a frame truncated right after its checksum byte.
pub fn checksum_matches(region: &[u8]) -> bool {
    match region.split_last() {
        Some((last, body)) if !body.is_empty() => xor_checksum(body) == *last,
        _ => false,
    }
}

/// Validate a complete frame: markers, length byte, and checksum.
///
/// Returns `false` for anything that is not exactly one well-formed frame.
pub fn validate_checksum(frame: &[u8]) -> bool {
    if frame.len() < FRAME_OVERHEAD {
        return false;
    }
    let payload_len = frame[3] as usize;
    let total = FRAME_OVERHEAD + payload_len;
    frame.len() == total
        && frame[..2] == HEADER_BYTES
        && frame[total - 2..] == FOOTER_BYTES
        && checksum_matches(&frame[..FRAME_PREFIX_LEN + payload_len + 1])
}

/// A parsed frame: command or data-type byte plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, rejecting payloads the length byte cannot describe.
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self, DecodeError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(DecodeError::PayloadTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(Frame { command, payload })
    }

    /// Build a frame whose payload length is known to fit.
    pub(crate) fn from_parts(command: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Frame { command, payload }
    }

    /// Command opcode or data-type tag.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Size of the frame on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Serialize the frame with header, checksum, and footer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&HEADER_BYTES);
        buf.push(self.command);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(xor_checksum(&buf));
        buf.extend_from_slice(&FOOTER_BYTES);
        buf
    }

    /// Parse exactly one frame from `bytes`.
    ///
    /// The buffer must hold the complete frame and nothing else.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(DecodeError::FrameTooShort {
                expected: FRAME_OVERHEAD,
                actual: bytes.len(),
            });
        }

        let header = [bytes[0], bytes[1]];
        if header != HEADER_BYTES {
            return Err(DecodeError::BadHeader(header));
        }

        let command = bytes[2];
        let payload_len = bytes[3] as usize;
        let available = bytes.len() - FRAME_OVERHEAD;
        if payload_len > available {
            return Err(DecodeError::LengthOverrun {
                declared: payload_len,
                available,
            });
        }

        let total = FRAME_OVERHEAD + payload_len;
        if bytes.len() > total {
            return Err(DecodeError::FrameTooLong {
                expected: total,
                actual: bytes.len(),
            });
        }

        let footer = [bytes[total - 2], bytes[total - 1]];
        if footer != FOOTER_BYTES {
            return Err(DecodeError::BadFooter(footer));
        }

        let checksum_at = FRAME_PREFIX_LEN + payload_len;
        let computed = xor_checksum(&bytes[..checksum_at]);
        let received = bytes[checksum_at];
        if computed != received {
            return Err(DecodeError::ChecksumMismatch { computed, received });
        }

        Ok(Frame {
            command,
            payload: bytes[FRAME_PREFIX_LEN..checksum_at].to_vec(),
        })
    }
}

/// Reassembles frames from a byte stream that may split or join them.
///
/// BLE notifications arrive in MTU-sized pieces, and a USB bulk read may carry
/// trailing noise; the codec scans for the header marker and yields the raw
/// bytes of each complete frame. Yielded bytes are not validated here.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Bytes received but not yet framed.
    buffer: BytesMut,
}

impl FrameCodec {
    /// Empty codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(MAX_BUFFERED_SIZE),
        }
    }

    /// Append bytes read from the transport.
    pub fn push(&mut self, data: &[u8]) {
        if self.buffer.len() + data.len() > MAX_BUFFERED_SIZE {
            log::warn!(
                "frame buffer overflow ({} + {} bytes), discarding",
                self.buffer.len(),
                data.len()
            );
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, or `None` until more bytes arrive.
    pub fn decode(&mut self) -> Option<Vec<u8>> {
        match self.buffer.windows(2).position(|w| w == HEADER_BYTES) {
            Some(0) => {}
            Some(skip) => {
                log::trace!("skipping {} bytes before frame header", skip);
                self.buffer.advance(skip);
            }
            None => {
                // Keep a trailing first marker byte in case the marker is split
                let keep = usize::from(self.buffer.last() == Some(&HEADER_BYTES[0]));
                let noise = self.buffer.len() - keep;
                self.buffer.advance(noise);
                return None;
            }
        }

        if self.buffer.len() < FRAME_PREFIX_LEN {
            return None;
        }

        let total = FRAME_OVERHEAD + self.buffer[3] as usize;
        if self.buffer.len() < total {
            return None;
        }

        Some(self.buffer.split_to(total).to_vec())
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered, e.g. after a rejected frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Vec<u8> {
        Frame::new(0x12, vec![0x10, 0x20, 0x30])
            .expect("payload fits")
            .encode()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample_frame();
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 3);
        assert_eq!(&bytes[..2], &[0x55, 0xAA]);
        assert_eq!(bytes[2], 0x12);
        assert_eq!(bytes[3], 3);
        assert_eq!(&bytes[4..7], &[0x10, 0x20, 0x30]);
        assert_eq!(bytes[7], 0xAA ^ 0x55 ^ 0x12 ^ 0x03 ^ 0x10 ^ 0x20 ^ 0x30);
        assert_eq!(&bytes[8..], &[0xAA, 0x55]);
    }

    #[test]
    fn test_empty_payload_frame() {
        let bytes = Frame::new(CMD_READ_DATA, Vec::new()).unwrap().encode();
        assert_eq!(bytes.len(), FRAME_OVERHEAD);
        assert!(validate_checksum(&bytes));
        let frame = Frame::parse(&bytes).expect("should parse");
        assert_eq!(frame.command(), CMD_READ_DATA);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_payload_too_long() {
        let err = Frame::new(0x01, vec![0; 256]).unwrap_err();
        assert_eq!(err, DecodeError::PayloadTooLong { max: 255, actual: 256 });
    }

    #[test]
    fn test_checksum_matches() {
        assert!(checksum_matches(&[0x01, 0x02, 0x03, 0x00]));
        assert!(!checksum_matches(&[0x01, 0x02, 0x03, 0xFF]));
        assert!(!checksum_matches(&[0x00]));
        assert!(!checksum_matches(&[]));
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut bytes = sample_frame();
        bytes.push(0x00);
        assert!(matches!(
            Frame::parse(&bytes),
            Err(DecodeError::FrameTooLong { .. })
        ));
        assert!(!validate_checksum(&bytes));
    }

    #[test]
    fn test_parse_rejects_overrun() {
        let mut bytes = sample_frame();
        bytes[3] = 40;
        assert!(matches!(
            Frame::parse(&bytes),
            Err(DecodeError::LengthOverrun { declared: 40, .. })
        ));
    }

    #[test]
    fn test_codec_partial() {
        let mut codec = FrameCodec::new();
        let encoded = sample_frame();

        codec.push(&encoded[..5]);
        assert!(codec.decode().is_none());

        codec.push(&encoded[5..]);
        let decoded = codec.decode().expect("should decode frame");
        assert_eq!(decoded, encoded);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_codec_skips_garbage() {
        let mut codec = FrameCodec::new();
        let encoded = sample_frame();

        codec.push(&[0x00, 0x13, 0x55]);
        assert!(codec.decode().is_none());
        // The dangling 0x55 must not swallow the real header
        assert_eq!(codec.buffered_len(), 1);

        codec.push(&encoded);
        let decoded = codec.decode().expect("should decode frame");
        assert_eq!(decoded, encoded);
    }

    #[test]
    fn test_codec_multiple() {
        let mut codec = FrameCodec::new();
        let first = sample_frame();
        let second = Frame::new(0x30, Vec::new()).unwrap().encode();

        codec.push(&first);
        codec.push(&second);

        assert_eq!(codec.decode().expect("first frame"), first);
        assert_eq!(codec.decode().expect("second frame"), second);
        assert!(codec.decode().is_none());
    }

    #[test]
    fn test_codec_overflow_clears() {
        let mut codec = FrameCodec::new();
        codec.push(&[0xAA; MAX_BUFFERED_SIZE]);
        codec.push(&[0x55]);
        assert_eq!(codec.buffered_len(), 1);
    }
}
