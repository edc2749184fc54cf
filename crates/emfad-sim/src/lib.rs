//! Simulated EMFAD instrument.
//!
//! The simulator answers the full command set over both link shapes: a USB
//! bulk endpoint pair and a GATT service whose replies arrive as MTU-sized
//! notifications. Measurement noise is drawn from a seeded ChaCha RNG so runs
//! are reproducible.
//!
//! Faults can be injected at any time through [`SimDevice::inject`] and
//! [`SimDevice::drop_connection`].

mod backend;
mod instrument;
mod provider;

pub use backend::*;
pub use instrument::*;
pub use provider::*;
