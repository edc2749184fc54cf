//! Protocol-level model of an EMFAD instrument.
//!
//! [`SimInstrument`] consumes command frames and produces the reply frames a
//! real instrument would send. It has no notion of USB or BLE; the backends
//! in this crate carry its replies over the matching transport shape.

use std::f64::consts::PI;

use emfad_protocol::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Simulated instrument parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// RNG seed for measurement noise.
    pub seed: u64,
    /// Mean signal strength.
    pub base_signal: f64,
    /// Amplitude of a slow sinusoidal drift on top of the mean.
    pub drift_amplitude: f64,
    /// Drift period in samples.
    pub drift_period: u32,
    /// Uniform noise half-width.
    pub noise: f64,
    /// Phase in degrees.
    pub phase: f64,
    /// Probe temperature in °C.
    pub temperature: f64,
    /// Battery charge in percent.
    pub battery_pct: u8,
    /// Reported link quality in percent.
    pub signal_quality: u8,
    /// Firmware version word.
    pub firmware_version: u16,
    /// Whether the probe starts out calibrated.
    pub calibrated: bool,
    /// Timestamp of the first sample, in milliseconds.
    pub start_timestamp_ms: i64,
    /// Milliseconds between consecutive samples.
    pub sample_interval_ms: i64,
    /// BLE notification size; replies are split into chunks of this many bytes.
    pub notify_mtu: usize,
    /// USB device path reported by enumeration.
    pub usb_path: String,
    /// BLE name advertised by the instrument.
    pub ble_name: String,
    /// BLE address reported by enumeration.
    pub ble_address: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            base_signal: 250.0,
            drift_amplitude: 0.0,
            drift_period: 100,
            noise: 5.0,
            phase: 45.0,
            temperature: 23.5,
            battery_pct: 87,
            signal_quality: 80,
            firmware_version: 0x0102,
            calibrated: true,
            start_timestamp_ms: 1_700_000_000_000,
            sample_interval_ms: 100,
            notify_mtu: 20,
            usb_path: "sim-usb-0".to_string(),
            ble_name: "EMFAD-SIM".to_string(),
            ble_address: "SI:MU:LA:TE:D0:01".to_string(),
        }
    }
}

/// Failures the instrument will inject into upcoming replies.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Answer the next N ReadData commands with an ERROR acknowledgement.
    pub fail_reads: u32,
    /// Flip the checksum of the next N replies.
    pub corrupt_replies: u32,
    /// Answer Connect with an ERROR acknowledgement.
    pub reject_connect: bool,
    /// Stay silent on the next N commands.
    pub swallow_commands: u32,
    /// Fail the next N GATT service discoveries.
    pub fail_discovery: u32,
    /// Hold the reply to the next command for this many milliseconds.
    pub delay_next_ms: u64,
}

/// Instrument state machine.
pub struct SimInstrument {
    config: SimConfig,
    rng: ChaCha8Rng,
    faults: Faults,
    frequency: Frequency,
    mode: Mode,
    gain: i16,
    offset: i16,
    measuring: bool,
    auto: bool,
    calibrated: bool,
    samples: u64,
    commands: Vec<u8>,
}

impl SimInstrument {
    /// Create an instrument in its power-on state.
    pub fn new(config: SimConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let calibrated = config.calibrated;
        Self {
            config,
            rng,
            faults: Faults::default(),
            frequency: Frequency::F19k,
            mode: Mode::A,
            gain: 100,
            offset: 0,
            measuring: false,
            auto: false,
            calibrated,
            samples: 0,
            commands: Vec::new(),
        }
    }

    /// Configuration the instrument was built with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Mutable access to pending faults.
    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Opcodes received so far, in order.
    pub fn received_commands(&self) -> &[u8] {
        &self.commands
    }

    /// Selected band.
    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Selected coil mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Gain as received (fixed point ×100).
    pub fn gain_raw(&self) -> i16 {
        self.gain
    }

    /// Offset as received (fixed point ×1000).
    pub fn offset_raw(&self) -> i16 {
        self.offset
    }

    /// Whether a measurement run is active.
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Handle one command frame and return the reply frames.
    pub fn handle(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("sim: dropping malformed command frame: {}", e);
                return Vec::new();
            }
        };
        self.commands.push(frame.command());
        trace!(opcode = frame.command(), "sim: command");

        if self.faults.swallow_commands > 0 {
            self.faults.swallow_commands -= 1;
            return Vec::new();
        }

        let mut reply = self.respond(frame.command(), frame.payload());
        if self.faults.corrupt_replies > 0 {
            self.faults.corrupt_replies -= 1;
            let at = reply.len().saturating_sub(FRAME_SUFFIX_LEN);
            if let Some(b) = reply.get_mut(at) {
                *b ^= 0xFF;
            }
        }
        vec![reply]
    }

    fn ack(command: u8, code: ResponseCode, data: &[u8]) -> Vec<u8> {
        // Ack payloads built here are at most 3 bytes
        encode_ack(command, code, data).unwrap_or_default()
    }

    fn respond(&mut self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        match opcode {
            CMD_CONNECT => {
                if self.faults.reject_connect {
                    Self::ack(opcode, ResponseCode::Error, &[])
                } else {
                    Self::ack(opcode, ResponseCode::Ok, &[PROTOCOL_VERSION])
                }
            }
            CMD_DISCONNECT => {
                self.measuring = false;
                Self::ack(opcode, ResponseCode::Ok, &[])
            }
            CMD_SET_FREQUENCY => match payload.first().and_then(|c| Frequency::from_code(*c)) {
                Some(f) if payload.len() == 4 => {
                    self.frequency = f;
                    Self::ack(opcode, ResponseCode::Ok, &[])
                }
                _ => Self::ack(opcode, ResponseCode::Error, &[]),
            },
            CMD_SET_MODE => match payload.first().and_then(|c| Mode::from_code(*c)) {
                Some(m) => {
                    self.mode = m;
                    Self::ack(opcode, ResponseCode::Ok, &[])
                }
                None => Self::ack(opcode, ResponseCode::Error, &[]),
            },
            CMD_SET_GAIN | CMD_SET_OFFSET => {
                if payload.len() != 2 {
                    return Self::ack(opcode, ResponseCode::Error, &[]);
                }
                let value = i16::from_le_bytes([payload[0], payload[1]]);
                if opcode == CMD_SET_GAIN {
                    self.gain = value;
                } else {
                    self.offset = value;
                }
                Self::ack(opcode, ResponseCode::Ok, &[])
            }
            CMD_START_MEASUREMENT => {
                if payload.len() != 5 {
                    return Self::ack(opcode, ResponseCode::Error, &[]);
                }
                if !self.calibrated {
                    return Self::ack(opcode, ResponseCode::CalibrationRequired, &[]);
                }
                self.auto = payload[0] != 0;
                self.measuring = true;
                Self::ack(opcode, ResponseCode::Ok, &[])
            }
            CMD_STOP_MEASUREMENT => {
                self.measuring = false;
                self.auto = false;
                Self::ack(opcode, ResponseCode::Ok, &[])
            }
            CMD_READ_DATA => {
                if self.faults.fail_reads > 0 {
                    self.faults.fail_reads -= 1;
                    return Self::ack(opcode, ResponseCode::Error, &[]);
                }
                self.sample()
            }
            CMD_CALIBRATE => {
                self.calibrated = true;
                Self::ack(opcode, ResponseCode::Ok, &[])
            }
            CMD_GET_STATUS => encode_status(&DeviceStatus {
                battery_pct: self.config.battery_pct,
                signal_quality: self.config.signal_quality,
                temperature: self.config.temperature,
                calibrated: self.calibrated,
                firmware_version: self.config.firmware_version,
            }),
            CMD_GET_VERSION => Self::ack(
                opcode,
                ResponseCode::Ok,
                &self.config.firmware_version.to_le_bytes(),
            ),
            _ => Self::ack(opcode, ResponseCode::InvalidCommand, &[]),
        }
    }

    /// Produce the next signal sample.
    fn sample(&mut self) -> Vec<u8> {
        let n = self.samples;
        self.samples += 1;

        let period = f64::from(self.config.drift_period.max(1));
        let drift = self.config.drift_amplitude * (2.0 * PI * n as f64 / period).sin();
        let noise = if self.config.noise > 0.0 {
            self.rng.gen_range(-self.config.noise..=self.config.noise)
        } else {
            0.0
        };
        let gain = f64::from(self.gain) / 100.0;
        let offset = f64::from(self.offset) / 1000.0;
        let signal = ((self.config.base_signal + drift + noise) * gain + offset).max(0.0);

        let timestamp = self.config.start_timestamp_ms + n as i64 * self.config.sample_interval_ms;
        encode_signal(
            timestamp,
            signal as f32,
            self.config.phase as f32,
            self.frequency.hz() as f32,
            self.config.temperature as f32,
        )
    }
}
