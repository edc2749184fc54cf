//! Session and connection error types.

use std::fmt;

use emfad_protocol::{DecodeError, ResponseCode};
use emfad_transport::TransportError;
use thiserror::Error;

/// Why a session was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by its owner.
    Requested,
    /// The link-level or Connect handshake failed.
    HandshakeFailed(String),
    /// The transport failed or timed out.
    Transport(TransportError),
}

impl CloseReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::HandshakeFailed(_) => "handshake_failed",
            CloseReason::Transport(_) => "transport",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by request"),
            CloseReason::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            CloseReason::Transport(err) => write!(f, "transport failure: {}", err),
        }
    }
}

/// Errors from a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another command is in flight.
    #[error("session busy")]
    Busy,

    /// Session has not completed its handshake.
    #[error("session not ready (state: {0})")]
    NotReady(String),

    /// Handshake failed; the session is closed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Session is closed.
    #[error("session closed: {0}")]
    Closed(CloseReason),

    /// The transport failed; the session is now closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A reply failed validation.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The instrument answered with a non-OK response code.
    #[error("command 0x{command:02X} rejected: {code}")]
    Rejected {
        /// Opcode of the rejected command.
        command: u8,
        /// Response code returned.
        code: ResponseCode,
    },
}

impl SessionError {
    /// Whether the session is unusable after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Closed(_) | SessionError::Transport(_) | SessionError::HandshakeFailed(_)
        )
    }
}

/// Errors from the [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No provider can open the requested device.
    #[error("no device found: {0}")]
    NoDeviceFound(String),

    /// The device did not complete its handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A connection is already open or being opened.
    #[error("already connected")]
    AlreadyConnected,

    /// No session is open.
    #[error("not connected")]
    NotConnected,

    /// `disconnect` was called while the connection was being opened.
    #[error("connect cancelled")]
    Cancelled,

    /// The session reported an error.
    #[error(transparent)]
    Session(#[from] SessionError),
}
