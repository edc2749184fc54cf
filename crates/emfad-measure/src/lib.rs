//! Measurement pipeline for EMFAD instruments.
//!
//! [`MeasurementPipeline`] pulls telemetry through the
//! [`DeviceManager`](emfad_device::DeviceManager)'s active session, converts
//! each sample into a [`MeasurementRecord`] with depth, conductivity and a
//! material guess, and keeps a bounded history.
//!
//! Storage, status display, positioning and material classification are
//! collaborators behind the traits in this crate; [`PatternClassifier`] is
//! the built-in heuristic.

mod collaborators;
mod config;
mod error;
mod formulas;
mod pipeline;
mod record;

pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use formulas::*;
pub use pipeline::*;
pub use record::*;
