//! Acquisition parameters.

use std::time::Duration;

use emfad_protocol::{Command, Frequency, Mode};
use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

/// Default number of records kept in memory.
pub const DEFAULT_HISTORY_CAP: usize = 10_000;

/// Parameters applied to the instrument and the acquisition loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Excitation band.
    pub frequency: Frequency,
    /// Coil mode.
    pub mode: Mode,
    /// Receiver gain.
    pub gain: f64,
    /// Receiver offset.
    pub offset: f64,
    /// Instrument-side sampling interval in auto mode.
    pub auto_interval_ms: u32,
    /// Let the instrument sample on its own clock.
    pub auto_mode: bool,
    /// Smoothing level recorded with each sample.
    pub filter_level: u8,
    /// Host polling cadence.
    pub poll_interval_ms: u64,
    /// Wait after a failed sample before polling again.
    pub error_backoff_ms: u64,
    /// Records kept in memory; the oldest are evicted first.
    pub history_cap: usize,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::F19k,
            mode: Mode::A,
            gain: 1.0,
            offset: 0.0,
            auto_interval_ms: 1000,
            auto_mode: false,
            filter_level: 3,
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl MeasurementConfig {
    /// Host polling cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Backoff after a failed sample.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Reject values the instrument or the loop cannot use.
    pub fn validate(&self) -> Result<(), MeasureError> {
        if !self.gain.is_finite() || !self.offset.is_finite() {
            return Err(MeasureError::InvalidConfig(
                "gain and offset must be finite".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(MeasureError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.history_cap == 0 {
            return Err(MeasureError::InvalidConfig(
                "history_cap must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Commands that put the instrument into this configuration.
    pub fn setup_commands(&self) -> [Command; 4] {
        [
            Command::SetFrequency(self.frequency),
            Command::SetMode(self.mode),
            Command::SetGain(self.gain),
            Command::SetOffset(self.offset),
        ]
    }

    /// Command that starts acquisition with this configuration.
    pub fn start_command(&self) -> Command {
        Command::StartMeasurement {
            auto: self.auto_mode,
            interval_ms: self.auto_interval_ms,
        }
    }
}
