//! Decode failures.

use thiserror::Error;

/// Errors raised while framing or decoding instrument traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is shorter than the smallest frame of the expected kind.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Buffer carries bytes beyond the declared frame end.
    #[error("frame too long: declared {expected} bytes, got {actual}")]
    FrameTooLong {
        /// Frame length implied by the length byte.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Declared payload length runs past the end of the buffer.
    #[error("declared payload length {declared} overruns buffer ({available} bytes available)")]
    LengthOverrun {
        /// Payload length from the length byte.
        declared: usize,
        /// Payload bytes actually present.
        available: usize,
    },

    /// Header marker mismatch.
    #[error("bad header: {0:02X?}")]
    BadHeader([u8; 2]),

    /// Footer marker mismatch.
    #[error("bad footer: {0:02X?}")]
    BadFooter([u8; 2]),

    /// Checksum byte does not match the XOR of the frame.
    #[error("checksum mismatch: computed 0x{computed:02X}, frame carries 0x{received:02X}")]
    ChecksumMismatch {
        /// XOR computed over header through payload.
        computed: u8,
        /// Checksum byte found in the frame.
        received: u8,
    },

    /// Frame carries a different data type than the decoder handles.
    #[error("unexpected data type: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedType {
        /// Data type the decoder handles.
        expected: u8,
        /// Data type found in the frame.
        actual: u8,
    },

    /// Payload size does not match the layout of its data type.
    #[error("invalid payload length for type 0x{data_type:02X}: expected {expected}, got {actual}")]
    PayloadLength {
        /// Data type of the frame.
        data_type: u8,
        /// Length required by the layout.
        expected: usize,
        /// Length found in the frame.
        actual: usize,
    },

    /// Payload does not fit the one-byte length field.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum payload length.
        max: usize,
        /// Requested payload length.
        actual: usize,
    },

    /// Field value outside its valid domain.
    #[error("invalid frame data: {0}")]
    InvalidData(String),
}
