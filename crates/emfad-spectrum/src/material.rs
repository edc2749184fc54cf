//! Heuristic material guess from spectrum shape and signal pattern.
//!
//! The rules here are coarse thresholds on normalized amplitude and dominant
//! frequency. They are approximate and meant as a fallback when no trained
//! classifier is available.

use std::fmt;
use std::str::FromStr;

use crate::analyzer::{Peak, Spectrum};
use crate::pattern::{signal_pattern, SignalPattern};

/// Amplitude above which a low-frequency response reads as metal.
pub const METAL_AMPLITUDE: f64 = 0.8;
/// Dominant frequency (Hz) below which a strong response reads as metal.
pub const METAL_MAX_FREQUENCY: f64 = 50_000.0;
/// Amplitude above which a stable response reads as ceramic.
pub const CERAMIC_AMPLITUDE: f64 = 0.6;
/// Amplitude below which a response reads as organic.
pub const ORGANIC_AMPLITUDE: f64 = 0.3;

/// Material categories reported with a measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MaterialType {
    /// Strong low-frequency response.
    Metal,
    /// Iron-bearing metal.
    FerrousMetal,
    /// Copper, aluminium and other non-iron metals.
    NonFerrousMetal,
    /// Stable, moderately strong response.
    Ceramic,
    /// Weak response.
    Organic,
    /// Mixed materials.
    Composite,
    /// Void in the ground.
    Cavity,
    /// Crystalline mineral.
    Crystal,
    /// Water-bearing ground.
    Water,
    /// No rule matched.
    #[default]
    Unknown,
}

impl MaterialType {
    /// Every material type.
    pub const ALL: [MaterialType; 10] = [
        MaterialType::Metal,
        MaterialType::FerrousMetal,
        MaterialType::NonFerrousMetal,
        MaterialType::Ceramic,
        MaterialType::Organic,
        MaterialType::Composite,
        MaterialType::Cavity,
        MaterialType::Crystal,
        MaterialType::Water,
        MaterialType::Unknown,
    ];

    /// Lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            MaterialType::Metal => "metal",
            MaterialType::FerrousMetal => "ferrous_metal",
            MaterialType::NonFerrousMetal => "non_ferrous_metal",
            MaterialType::Ceramic => "ceramic",
            MaterialType::Organic => "organic",
            MaterialType::Composite => "composite",
            MaterialType::Cavity => "cavity",
            MaterialType::Crystal => "crystal",
            MaterialType::Water => "water",
            MaterialType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MaterialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MaterialType::ALL
            .into_iter()
            .find(|m| m.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown material type: {}", s))
    }
}

/// Result of [`analyze_material`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MaterialAnalysis {
    /// Best guess.
    pub material: MaterialType,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Frequency of the spectrum peak.
    pub dominant_frequency: f64,
    /// Pattern of the signal series.
    pub pattern: SignalPattern,
    /// Spectrum peaks, highest first.
    pub peaks: Vec<Peak>,
}

/// Guess a material from dominant frequency, amplitude and pattern.
pub fn classify_material(frequency: f64, amplitude: f64, pattern: SignalPattern) -> MaterialType {
    if amplitude > METAL_AMPLITUDE && frequency < METAL_MAX_FREQUENCY {
        MaterialType::Metal
    } else if amplitude > CERAMIC_AMPLITUDE && pattern == SignalPattern::Stable {
        MaterialType::Ceramic
    } else if amplitude < ORGANIC_AMPLITUDE {
        MaterialType::Organic
    } else if pattern == SignalPattern::Oscillating {
        MaterialType::Composite
    } else {
        MaterialType::Unknown
    }
}

/// Confidence as the peak's share of total power, discounted by pattern reliability.
pub fn confidence(spectrum: &Spectrum, pattern: SignalPattern) -> f64 {
    let total = spectrum.total_power();
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    let share = spectrum.peak_amplitude() / total;
    (share * pattern.reliability()).clamp(0.0, 1.0)
}

/// Combine a spectrum with the recent signal series into a material guess.
pub fn analyze_material(spectrum: &Spectrum, signals: &[f64]) -> MaterialAnalysis {
    let pattern = signal_pattern(signals);
    let dominant_frequency = spectrum.peak_frequency();
    MaterialAnalysis {
        material: classify_material(dominant_frequency, spectrum.peak_amplitude(), pattern),
        confidence: confidence(spectrum, pattern),
        dominant_frequency,
        pattern,
        peaks: spectrum.peaks(),
    }
}
