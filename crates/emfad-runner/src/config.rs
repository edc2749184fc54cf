//! Runner configuration file.
//!
//! Every section is optional; missing fields take their defaults. A minimal
//! file looks like:
//!
//! ```yaml
//! transport: ble
//! measurement:
//!   frequency: F76k
//!   gain: 2.0
//! session:
//!   command_timeout_ms: 2000
//! ```

use std::path::Path;
use std::time::Duration;

use emfad_device::SessionConfig;
use emfad_measure::{MeasureError, MeasurementConfig};
use emfad_sim::SimConfig;
use emfad_transport::{DeviceIdentifiers, TransportKind, COMMAND_TIMEOUT, CONNECT_TIMEOUT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Measurement settings are out of range.
    #[error("invalid measurement settings: {0}")]
    Measurement(#[from] MeasureError),
}

/// Session deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimeouts {
    /// Transport handshake plus Connect round trip.
    pub connect_timeout_ms: u64,
    /// Each command round trip.
    pub command_timeout_ms: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            command_timeout_ms: COMMAND_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Preferred link type when several instruments are found.
    pub transport: Option<TransportKind>,
    /// USB and BLE identifiers used to filter discovery.
    pub identifiers: DeviceIdentifiers,
    /// Session deadlines.
    pub session: SessionTimeouts,
    /// Acquisition parameters.
    pub measurement: MeasurementConfig,
    /// Simulated instrument used by `--simulate`.
    pub simulator: SimConfig,
}

impl RunnerConfig {
    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: RunnerConfig = serde_yaml::from_str(text)?;
        config.measurement.validate()?;
        Ok(config)
    }

    /// Session timeouts as a [`SessionConfig`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_connect_timeout(Duration::from_millis(self.session.connect_timeout_ms))
            .with_command_timeout(Duration::from_millis(self.session.command_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emfad_protocol::{Frequency, Mode};

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = RunnerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.session.connect_timeout_ms, 10_000);
        assert_eq!(config.session.command_timeout_ms, 5_000);
        assert!(config.transport.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
transport: ble
measurement:
  frequency: F76k
  mode: AMinusB
  gain: 2.0
session:
  command_timeout_ms: 2000
simulator:
  base_signal: 400.0
identifiers:
  name_prefix: "EMFAD-UG"
"#;
        let config = RunnerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.transport, Some(TransportKind::Ble));
        assert_eq!(config.measurement.frequency, Frequency::F76k);
        assert_eq!(config.measurement.mode, Mode::AMinusB);
        assert_eq!(config.measurement.filter_level, 3);
        assert_eq!(config.session.connect_timeout_ms, 10_000);
        assert_eq!(config.simulator.base_signal, 400.0);
        assert_eq!(config.simulator.ble_name, "EMFAD-SIM");
        assert_eq!(config.identifiers.name_prefix, "EMFAD-UG");

        let session = config.session_config();
        assert_eq!(session.command_timeout, Duration::from_secs(2));
        assert_eq!(session.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_frequency_rejected() {
        let err = RunnerConfig::from_yaml("measurement:\n  frequency: F20k\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_invalid_measurement_rejected() {
        let err = RunnerConfig::from_yaml("measurement:\n  poll_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Measurement(_)));
    }
}
