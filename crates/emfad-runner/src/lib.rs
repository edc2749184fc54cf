//! Command-line front end for EMFAD instruments.
//!
//! The `emfad` binary wraps this library. [`App`] owns the device manager
//! and implements the `scan`, `status`, `step` and `measure` subcommands;
//! [`analyze_sweep`] backs `spectrum`. Reports go through [`Reporter`] as
//! JSON lines or text.
//!
//! Only the simulated instrument from `emfad-sim` is wired in. Platform USB
//! and BLE stacks plug in as further `DeviceProvider`s.

mod app;
mod config;
mod input;
mod output;

pub use app::*;
pub use config::*;
pub use input::*;
pub use output::*;
