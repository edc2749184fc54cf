//! Measurement records.

use std::collections::BTreeMap;

use emfad_protocol::{Frequency, Mode, RawTelemetry};
use emfad_spectrum::MaterialType;
use serde::{Deserialize, Serialize};

use crate::config::MeasurementConfig;
use crate::formulas::{conductivity, depth};

/// Geographic position attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Metres above the reference ellipsoid, if known.
    pub altitude: Option<f64>,
}

/// One processed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Instrument timestamp in milliseconds.
    pub timestamp: i64,
    /// Where the sample was taken, if a position source is attached.
    pub position: Option<GeoPosition>,
    /// Configured excitation band.
    pub frequency: Frequency,
    /// Configured coil mode.
    pub mode: Mode,
    /// Raw signal strength.
    pub signal_strength: f64,
    /// Estimated depth.
    pub depth: f64,
    /// Relative conductivity.
    pub conductivity: f64,
    /// Instrument temperature.
    pub temperature: f64,
    /// Classified material.
    pub material: MaterialType,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Acquisition settings and auxiliary readings.
    pub metadata: BTreeMap<String, f64>,
}

impl MeasurementRecord {
    /// Derive a record from one decoded sample.
    ///
    /// Conductivity uses the frequency the instrument reported with the
    /// sample. The material is left unknown for the classifier to fill in.
    pub fn from_telemetry(
        telemetry: &RawTelemetry,
        config: &MeasurementConfig,
        position: Option<GeoPosition>,
    ) -> Self {
        let signal = telemetry.signal_strength;
        let metadata = BTreeMap::from([
            ("gain".to_string(), config.gain),
            ("offset".to_string(), config.offset),
            ("filter_level".to_string(), f64::from(config.filter_level)),
            ("phase".to_string(), telemetry.phase),
        ]);
        Self {
            timestamp: telemetry.timestamp,
            position,
            frequency: config.frequency,
            mode: config.mode,
            signal_strength: signal,
            depth: depth(signal),
            conductivity: conductivity(signal, telemetry.frequency, config.mode),
            temperature: telemetry.temperature,
            material: MaterialType::Unknown,
            confidence: 0.0,
            metadata,
        }
    }

    /// Phase reading stored in the metadata.
    pub fn phase(&self) -> Option<f64> {
        self.metadata.get("phase").copied()
    }
}
