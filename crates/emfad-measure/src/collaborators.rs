//! Interfaces the pipeline calls out to, and the default classifier.

use emfad_spectrum::{analyze_material, MaterialType, Spectrum};

use crate::formulas::SIGNAL_REFERENCE;
use crate::pipeline::PipelineStatus;
use crate::record::{GeoPosition, MeasurementRecord};

/// Boxed error returned by sinks.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Assigns a material to the newest record of a series.
pub trait MaterialClassifier: Send + Sync {
    /// Classify `records`, oldest first. The last record is the one being
    /// classified; earlier ones give context.
    fn classify(&self, records: &[MeasurementRecord]) -> (MaterialType, f64);
}

/// Persists records.
pub trait StorageSink: Send + Sync {
    /// Store one record. Failures are logged and do not stop acquisition.
    fn save(&self, record: &MeasurementRecord) -> Result<(), SinkError>;
}

/// Receives pipeline status after every sample.
pub trait StateSink: Send + Sync {
    /// Publish the current status.
    fn publish(&self, status: &PipelineStatus);
}

/// Supplies the current position for record tagging.
pub trait PositionSource: Send + Sync {
    /// Current position, if a fix is available.
    fn current(&self) -> Option<GeoPosition>;
}

/// Heuristic classifier over the recent signal series.
///
/// Signals are normalized to the depth reference level, the latest one is
/// treated as the dominant amplitude and the window gives the trend pattern.
/// The result is approximate.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    window: usize,
}

impl PatternClassifier {
    /// Default number of records considered.
    pub const DEFAULT_WINDOW: usize = 32;

    /// Classifier looking at the last `window` records (at least one).
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

impl MaterialClassifier for PatternClassifier {
    fn classify(&self, records: &[MeasurementRecord]) -> (MaterialType, f64) {
        let Some(latest) = records.last() else {
            return (MaterialType::Unknown, 0.0);
        };
        let start = records.len().saturating_sub(self.window);
        let signals: Vec<f64> = records[start..]
            .iter()
            .map(|r| r.signal_strength / SIGNAL_REFERENCE)
            .collect();
        let spectrum = Spectrum::from_signal(
            latest.signal_strength / SIGNAL_REFERENCE,
            latest.frequency.hz(),
        );
        let analysis = analyze_material(&spectrum, &signals);
        (analysis.material, analysis.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementConfig;
    use approx::assert_relative_eq;
    use emfad_protocol::{decode_signal, encode_signal, Frequency};

    fn record(signal: f32, frequency: Frequency) -> MeasurementRecord {
        let bytes = encode_signal(0, signal, 10.0, frequency.hz() as f32, 20.0);
        let telemetry = decode_signal(&bytes).expect("valid signal frame");
        let config = MeasurementConfig {
            frequency,
            ..Default::default()
        };
        MeasurementRecord::from_telemetry(&telemetry, &config, None)
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(
            PatternClassifier::default().classify(&[]),
            (MaterialType::Unknown, 0.0)
        );
    }

    #[test]
    fn test_strong_stable_low_band_is_metal() {
        let records: Vec<_> = (0..5).map(|_| record(900.0, Frequency::F19k)).collect();
        let (material, confidence) = PatternClassifier::default().classify(&records);
        assert_eq!(material, MaterialType::Metal);
        assert_relative_eq!(confidence, 0.9);
    }

    #[test]
    fn test_weak_signal_is_organic() {
        let records = vec![record(100.0, Frequency::F95k)];
        let (material, confidence) = PatternClassifier::default().classify(&records);
        assert_eq!(material, MaterialType::Organic);
        assert!(confidence > 0.0 && confidence <= 1.0);
    }

    #[test]
    fn test_window_ignores_old_records() {
        // Old rising ramp outside the window must not affect the pattern
        let mut records: Vec<_> = (0..10)
            .map(|i| record(100.0 * i as f32, Frequency::F19k))
            .collect();
        records.extend((0..3).map(|_| record(700.0, Frequency::F19k)));
        let (material, _) = PatternClassifier::new(3).classify(&records);
        assert_eq!(material, MaterialType::Ceramic);
    }
}
