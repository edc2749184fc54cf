//! Windowed power spectrum and peak detection.

use std::f64::consts::PI;

use thiserror::Error;

/// Minimum amplitude for a local maximum to count as a peak.
pub const MIN_PEAK_AMPLITUDE: f64 = 0.1;

/// Errors from spectrum construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    /// Input arrays have different lengths.
    #[error("length mismatch: {samples} samples but {frequencies} frequencies")]
    LengthMismatch {
        /// Number of samples or amplitudes.
        samples: usize,
        /// Number of frequencies.
        frequencies: usize,
    },
}

/// A local maximum in a spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    /// Frequency of the peak bin.
    pub frequency: f64,
    /// Amplitude at the peak.
    pub amplitude: f64,
    /// Bin index.
    pub index: usize,
    /// Width in bins at half maximum.
    pub width: f64,
    /// Height above the lower of the two neighbours.
    pub prominence: f64,
}

/// Power spectrum with its summary values.
///
/// The three arrays always have equal length.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Spectrum {
    frequencies: Vec<f64>,
    amplitudes: Vec<f64>,
    phases: Vec<f64>,
    peak_frequency: f64,
    peak_amplitude: f64,
    total_power: f64,
}

impl Spectrum {
    /// Build a spectrum, deriving the peak and total power.
    ///
    /// The peak is the highest detected [`Peak`]. With no detected peak the
    /// peak frequency is the first bin and the peak amplitude is zero; an
    /// empty spectrum has zero peak and power.
    pub fn new(
        frequencies: Vec<f64>,
        amplitudes: Vec<f64>,
        phases: Vec<f64>,
    ) -> Result<Self, SpectrumError> {
        if frequencies.len() != amplitudes.len() {
            return Err(SpectrumError::LengthMismatch {
                samples: amplitudes.len(),
                frequencies: frequencies.len(),
            });
        }
        if phases.len() != amplitudes.len() {
            return Err(SpectrumError::LengthMismatch {
                samples: phases.len(),
                frequencies: frequencies.len(),
            });
        }

        let (peak_frequency, peak_amplitude) = match peaks_unchecked(&amplitudes, &frequencies)
            .first()
        {
            Some(peak) => (peak.frequency, peak.amplitude),
            None => (frequencies.first().copied().unwrap_or(0.0), 0.0),
        };
        let total_power = amplitudes.iter().sum();

        Ok(Self {
            frequencies,
            amplitudes,
            phases,
            peak_frequency,
            peak_amplitude,
            total_power,
        })
    }

    /// One-point spectrum for a single signal reading.
    pub fn from_signal(signal: f64, frequency: f64) -> Self {
        Self {
            frequencies: vec![frequency],
            amplitudes: vec![signal],
            phases: vec![0.0],
            peak_frequency: frequency,
            peak_amplitude: signal,
            total_power: signal,
        }
    }

    /// Bin frequencies.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Bin power values.
    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    /// Bin phases in radians.
    pub fn phases(&self) -> &[f64] {
        &self.phases
    }

    /// Frequency of the dominant bin.
    pub fn peak_frequency(&self) -> f64 {
        self.peak_frequency
    }

    /// Power of the dominant bin.
    pub fn peak_amplitude(&self) -> f64 {
        self.peak_amplitude
    }

    /// Sum of all bin powers.
    pub fn total_power(&self) -> f64 {
        self.total_power
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    /// Whether the spectrum has no bins.
    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Peaks of this spectrum, highest first.
    pub fn peaks(&self) -> Vec<Peak> {
        peaks_unchecked(&self.amplitudes, &self.frequencies)
    }
}

/// Turn a sample series into a power spectrum.
///
/// Applies a Hanning window, squares the windowed values as a power proxy and
/// assigns evenly spaced phases. This is not an FFT: bin `i` stays paired with
/// `frequencies[i]`.
pub fn analyze(samples: &[f64], frequencies: &[f64]) -> Result<Spectrum, SpectrumError> {
    if samples.len() != frequencies.len() {
        return Err(SpectrumError::LengthMismatch {
            samples: samples.len(),
            frequencies: frequencies.len(),
        });
    }

    let windowed = hanning_window(samples);
    let power: Vec<f64> = windowed.iter().map(|v| v * v).collect();
    let phases = bin_phases(windowed.len());
    Spectrum::new(frequencies.to_vec(), power, phases)
}

/// Multiply `samples` by a Hanning window.
///
/// A window over fewer than two samples is all ones.
pub fn hanning_window(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n <= 1 {
        return samples.to_vec();
    }
    let span = (n - 1) as f64;
    samples
        .iter()
        .enumerate()
        .map(|(i, v)| v * 0.5 * (1.0 - (2.0 * PI * i as f64 / span).cos()))
        .collect()
}

fn bin_phases(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| (i as f64 * 2.0 * PI / n as f64) % (2.0 * PI))
        .collect()
}

/// Local maxima above [`MIN_PEAK_AMPLITUDE`], sorted by descending amplitude.
///
/// Equal amplitudes keep their bin order.
pub fn find_peaks(amplitudes: &[f64], frequencies: &[f64]) -> Result<Vec<Peak>, SpectrumError> {
    if amplitudes.len() != frequencies.len() {
        return Err(SpectrumError::LengthMismatch {
            samples: amplitudes.len(),
            frequencies: frequencies.len(),
        });
    }
    Ok(peaks_unchecked(amplitudes, frequencies))
}

fn peaks_unchecked(amplitudes: &[f64], frequencies: &[f64]) -> Vec<Peak> {
    let mut peaks: Vec<Peak> = amplitudes
        .windows(3)
        .enumerate()
        .filter_map(|(k, w)| {
            let (prev, current, next) = (w[0], w[1], w[2]);
            if current > prev && current > next && current > MIN_PEAK_AMPLITUDE {
                let index = k + 1;
                Some(Peak {
                    frequency: frequencies[index],
                    amplitude: current,
                    index,
                    width: half_max_width(amplitudes, index),
                    prominence: current - prev.min(next),
                })
            } else {
                None
            }
        })
        .collect();
    // Stable sort; NaN cannot pass the threshold test above
    peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
    peaks
}

fn half_max_width(amplitudes: &[f64], index: usize) -> f64 {
    let half = amplitudes[index] / 2.0;
    let mut left = index;
    while left > 0 && amplitudes[left] > half {
        left -= 1;
    }
    let mut right = index;
    while right < amplitudes.len() - 1 && amplitudes[right] > half {
        right += 1;
    }
    (right - left) as f64
}
