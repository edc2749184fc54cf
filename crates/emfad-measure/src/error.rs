use emfad_device::SessionError;
use thiserror::Error;

/// Errors from the measurement pipeline.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// No device session is open.
    #[error("no device connected")]
    NotConnected,

    /// Continuous acquisition is already running.
    #[error("continuous measurement already running")]
    AlreadyRunning,

    /// Configuration rejected before use.
    #[error("invalid measurement config: {0}")]
    InvalidConfig(String),

    /// The acquisition thread could not be started.
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The device session reported an error.
    #[error(transparent)]
    Session(#[from] SessionError),
}
