//! Device sessions and connection management for EMFAD instruments.
//!
//! - [`DeviceSession`] pairs the protocol codec with one [`Transport`] and runs
//!   synchronous command/response exchanges, one at a time.
//! - [`DeviceManager`] discovers instruments through [`DeviceProvider`]s, owns
//!   the active session, and publishes [`ConnectionState`] transitions.
//!
//! [`Transport`]: emfad_transport::Transport

mod error;
mod manager;
mod session;

pub use error::*;
pub use manager::*;
pub use session::*;
