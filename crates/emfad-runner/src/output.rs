//! Report formatting for the command-line front end.
//!
//! Each report is written either as one JSON object per line,
//! `{"type": ..., "data": ...}`, or as a human-readable line.

use std::io::{self, Write};

use chrono::{SecondsFormat, TimeZone, Utc};
use clap::ValueEnum;
use emfad_device::CandidateDevice;
use emfad_measure::MeasurementRecord;
use emfad_protocol::DeviceStatus;
use emfad_spectrum::{MaterialAnalysis, Peak};
use emfad_transport::TransportKind;
use serde::{Deserialize, Serialize};

/// Output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human-readable line per report.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Status of the connected instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Instrument name.
    pub device: String,
    /// Link type.
    pub transport: TransportKind,
    /// Link quality in `0.0..=1.0`.
    pub quality: f64,
    /// Firmware as `major.minor`.
    pub firmware: String,
    /// Decoded status report.
    pub status: DeviceStatus,
}

/// Totals printed when a step sequence or a continuous run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Records kept.
    pub recorded: u64,
    /// Samples that failed.
    pub failed: u64,
    /// Anomaly depth over the recorded history.
    pub anomaly_depth: f64,
    /// Why the run ended, for continuous runs.
    pub ended: Option<String>,
}

/// Result of analyzing a sweep file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumReport {
    /// Number of points.
    pub points: usize,
    /// Frequency of the strongest windowed bin.
    pub peak_frequency: f64,
    /// Power of the strongest windowed bin.
    pub peak_amplitude: f64,
    /// Sum of the windowed power.
    pub total_power: f64,
    /// Peaks of the raw samples, highest first.
    pub peaks: Vec<Peak>,
    /// Material guess over the windowed spectrum.
    pub material: MaterialAnalysis,
}

#[derive(Serialize)]
struct Line<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

/// Writes reports in the selected format.
pub struct Reporter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> Reporter<W> {
    /// Reporter writing to `out`.
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Selected format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// A discovered instrument.
    pub fn device(&mut self, device: &CandidateDevice) -> io::Result<()> {
        self.emit("device", device, || {
            format!("{:<4} {:<24} {}", device.kind.to_string(), device.name, device.address())
        })
    }

    /// Instrument status.
    pub fn status(&mut self, report: &StatusReport) -> io::Result<()> {
        self.emit("status", report, || {
            let s = &report.status;
            format!(
                "{} ({}) firmware {}, battery {}%, signal {}%, {:.1} °C, {}, link quality {:.2}",
                report.device,
                report.transport,
                report.firmware,
                s.battery_pct,
                s.signal_quality,
                s.temperature,
                if s.calibrated { "calibrated" } else { "not calibrated" },
                report.quality
            )
        })
    }

    /// One measurement record.
    pub fn record(&mut self, record: &MeasurementRecord) -> io::Result<()> {
        self.emit("record", record, || {
            format!(
                "{}  {:>7}  {:<3}  signal {:>8.2}  depth {:>6.2}  conductivity {:.4}  {} ({:.2})",
                format_timestamp(record.timestamp),
                record.frequency.to_string(),
                record.mode.label(),
                record.signal_strength,
                record.depth,
                record.conductivity,
                record.material,
                record.confidence
            )
        })
    }

    /// A sample that failed.
    pub fn sample_failed(&mut self, reason: &str) -> io::Result<()> {
        self.emit("sample_failed", &reason, || format!("sample failed: {}", reason))
    }

    /// End-of-run totals.
    pub fn summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        self.emit("summary", summary, || {
            let mut text = format!(
                "{} recorded, {} failed, anomaly depth {:.2}",
                summary.recorded, summary.failed, summary.anomaly_depth
            );
            if let Some(ended) = &summary.ended {
                text.push_str(&format!(" ({})", ended));
            }
            text
        })
    }

    /// Sweep analysis.
    pub fn spectrum(&mut self, report: &SpectrumReport) -> io::Result<()> {
        self.emit("spectrum", report, || {
            let mut text = format!(
                "{} points, peak {:.0} Hz ({:.4}), total power {:.4}\n",
                report.points, report.peak_frequency, report.peak_amplitude, report.total_power
            );
            for peak in &report.peaks {
                text.push_str(&format!(
                    "  peak {:>10.0} Hz  amplitude {:.4}  width {}  prominence {:.4}\n",
                    peak.frequency, peak.amplitude, peak.width, peak.prominence
                ));
            }
            let m = &report.material;
            text.push_str(&format!(
                "material {} (confidence {:.2}, pattern {})",
                m.material, m.confidence, m.pattern
            ));
            text
        })
    }

    fn emit<T: Serialize>(
        &mut self,
        kind: &str,
        data: &T,
        text: impl FnOnce() -> String,
    ) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, &Line { kind, data }).map_err(io::Error::from)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => writeln!(self.out, "{}", text())?,
        }
        self.out.flush()
    }
}

/// Instrument timestamp as RFC 3339 UTC, or the raw value if out of range.
pub fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
