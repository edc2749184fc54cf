//! Depth and conductivity estimates.

use emfad_protocol::{Frequency, Mode};
use statrs::statistics::Statistics;

/// Attenuation constant in the depth estimate.
pub const DEPTH_FACTOR: f64 = 0.417;

/// Signal level that maps to zero depth.
pub const SIGNAL_REFERENCE: f64 = 1000.0;

/// Upper bound on the relative spread removed by the stability factor.
pub const MAX_INSTABILITY: f64 = 0.5;

/// Estimated depth of the source of `signal`.
///
/// `-ln(signal / 1000) / 0.417`, or 0 for a non-positive signal.
pub fn depth(signal: f64) -> f64 {
    if signal > 0.0 {
        -(signal / SIGNAL_REFERENCE).ln() / DEPTH_FACTOR
    } else {
        0.0
    }
}

/// Conductivity scaling for each receiver mode.
pub fn mode_scale(mode: Mode) -> f64 {
    match mode {
        Mode::A => 1.0,
        Mode::B => 0.8,
        Mode::AMinusB => 1.2,
        Mode::BMinusA => 0.9,
    }
}

/// Relative conductivity: `signal / frequency × 1000`, scaled by mode.
///
/// 0 when the frequency is not positive.
pub fn conductivity(signal: f64, frequency_hz: f64, mode: Mode) -> f64 {
    if frequency_hz <= 0.0 {
        return 0.0;
    }
    signal / frequency_hz * 1000.0 * mode_scale(mode)
}

/// Depth correction for higher excitation bands.
pub fn band_correction(frequency: Frequency) -> f64 {
    match frequency {
        Frequency::F19k => 1.0,
        Frequency::F38k => 0.95,
        Frequency::F57k => 0.90,
        Frequency::F76k => 0.85,
        Frequency::F95k => 0.80,
        Frequency::F114k => 0.75,
        Frequency::F135k => 0.70,
    }
}

/// Depth of an anomaly seen across a series of signals.
///
/// Takes the depth of the strongest signal and scales it by the series
/// stability `1 - clamp(σ/μ, 0, 0.5)` (two or more samples) and by
/// [`band_correction`]. Empty input gives 0.
pub fn anomaly_depth(signals: &[f64], frequency: Frequency) -> f64 {
    let Some(max) = signals.iter().copied().reduce(f64::max) else {
        return 0.0;
    };
    let stability = if signals.len() >= 2 {
        let mean = signals.mean();
        let spread = if mean > 0.0 {
            signals.population_std_dev() / mean
        } else {
            MAX_INSTABILITY
        };
        1.0 - spread.clamp(0.0, MAX_INSTABILITY)
    } else {
        1.0
    };
    depth(max) * stability * band_correction(frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_depth_reference_points() {
        assert_eq!(depth(1000.0), 0.0);
        assert_eq!(depth(0.0), 0.0);
        assert_eq!(depth(-3.0), 0.0);
        assert_eq!(depth(f64::NAN), 0.0);
        assert_relative_eq!(
            depth(SIGNAL_REFERENCE / std::f64::consts::E),
            1.0 / 0.417,
            epsilon = 1e-12
        );
        // Stronger than the reference reads as above the surface
        assert!(depth(2000.0) < 0.0);
    }

    #[test]
    fn test_depth_strictly_decreasing() {
        let mut last = f64::INFINITY;
        for i in 1..1000 {
            let d = depth(i as f64);
            assert!(d < last, "depth({}) = {} not below {}", i, d, last);
            assert!(d > 0.0);
            last = d;
        }
    }

    #[test]
    fn test_conductivity_modes() {
        assert_relative_eq!(conductivity(190.0, 19_000.0, Mode::A), 10.0, epsilon = 1e-12);
        assert_relative_eq!(conductivity(190.0, 19_000.0, Mode::B), 8.0, epsilon = 1e-12);
        assert_relative_eq!(conductivity(190.0, 19_000.0, Mode::AMinusB), 12.0, epsilon = 1e-12);
        assert_relative_eq!(conductivity(190.0, 19_000.0, Mode::BMinusA), 9.0, epsilon = 1e-12);
        assert_eq!(conductivity(190.0, 0.0, Mode::A), 0.0);
    }

    #[test]
    fn test_anomaly_depth() {
        assert_eq!(anomaly_depth(&[], Frequency::F19k), 0.0);

        let single = anomaly_depth(&[100.0], Frequency::F19k);
        assert_relative_eq!(single, depth(100.0));

        // Identical signals: no instability, only the band correction applies
        let flat = anomaly_depth(&[100.0, 100.0, 100.0], Frequency::F76k);
        assert_relative_eq!(flat, depth(100.0) * 0.85, epsilon = 1e-12);

        // σ/μ ≈ 0.41 for [50, 100, 150]
        let spread = anomaly_depth(&[50.0, 100.0, 150.0], Frequency::F19k);
        let expected = depth(150.0) * (1.0 - (2.0f64 / 3.0).sqrt() * 50.0 / 100.0);
        assert_relative_eq!(spread, expected, epsilon = 1e-12);

        // Spread beyond the cap halves the depth
        let wild = anomaly_depth(&[1.0, 999.0], Frequency::F19k);
        assert_relative_eq!(wild, depth(999.0) * 0.5, epsilon = 1e-12);
    }
}
