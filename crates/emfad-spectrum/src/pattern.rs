//! Trend and variance based signal pattern.

use std::fmt;

use statrs::statistics::Statistics;

/// Variance below which a flat series counts as stable.
pub const STABLE_VARIANCE: f64 = 0.01;
/// Absolute slope below which a low-variance series counts as stable.
pub const STABLE_TREND: f64 = 0.001;
/// Slope magnitude that marks a rising or falling series.
pub const TREND_THRESHOLD: f64 = 0.01;
/// Variance above which a trendless series counts as oscillating.
pub const OSCILLATION_VARIANCE: f64 = 0.1;

/// Coarse shape of a signal-strength series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SignalPattern {
    /// Low variance and no meaningful slope.
    Stable,
    /// Rising trend.
    Increasing,
    /// Falling trend.
    Decreasing,
    /// High variance around a flat trend.
    Oscillating,
    /// Neither steady nor clearly trending.
    Variable,
    /// No samples.
    Unknown,
}

impl SignalPattern {
    /// Weight applied to a material guess made under this pattern.
    pub fn reliability(self) -> f64 {
        match self {
            SignalPattern::Stable => 0.9,
            SignalPattern::Increasing | SignalPattern::Decreasing => 0.7,
            SignalPattern::Oscillating => 0.6,
            SignalPattern::Variable => 0.5,
            SignalPattern::Unknown => 0.3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            SignalPattern::Stable => "stable",
            SignalPattern::Increasing => "increasing",
            SignalPattern::Decreasing => "decreasing",
            SignalPattern::Oscillating => "oscillating",
            SignalPattern::Variable => "variable",
            SignalPattern::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SignalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a series from its population variance and least-squares slope.
pub fn signal_pattern(signals: &[f64]) -> SignalPattern {
    if signals.is_empty() {
        return SignalPattern::Unknown;
    }
    let variance = signals.population_variance();
    let slope = trend(signals);

    if variance < STABLE_VARIANCE && slope.abs() < STABLE_TREND {
        SignalPattern::Stable
    } else if slope > TREND_THRESHOLD {
        SignalPattern::Increasing
    } else if slope < -TREND_THRESHOLD {
        SignalPattern::Decreasing
    } else if variance > OSCILLATION_VARIANCE {
        SignalPattern::Oscillating
    } else {
        SignalPattern::Variable
    }
}

/// Least-squares slope of `signals` against the sample index.
///
/// Zero for fewer than two samples.
pub fn trend(signals: &[f64]) -> f64 {
    if signals.len() < 2 {
        return 0.0;
    }
    let n = signals.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_x2) = signals.iter().enumerate().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sx2), (i, &y)| {
            let x = i as f64;
            (sx + x, sy + y, sxy + x * y, sx2 + x * x)
        },
    );
    (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trend() {
        assert_relative_eq!(trend(&[1.0, 2.0, 3.0, 4.0]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(trend(&[4.0, 2.0, 0.0]), -2.0, epsilon = 1e-12);
        assert_eq!(trend(&[5.0]), 0.0);
        assert_eq!(trend(&[]), 0.0);
    }

    #[test]
    fn test_patterns() {
        assert_eq!(signal_pattern(&[]), SignalPattern::Unknown);
        assert_eq!(signal_pattern(&[0.5, 0.5, 0.5, 0.5]), SignalPattern::Stable);
        assert_eq!(signal_pattern(&[0.1, 0.2, 0.3, 0.4]), SignalPattern::Increasing);
        assert_eq!(signal_pattern(&[0.4, 0.3, 0.2, 0.1]), SignalPattern::Decreasing);
        assert_eq!(
            signal_pattern(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]),
            SignalPattern::Oscillating
        );
        // Symmetric wiggle: no slope, variance between the bounds
        assert_eq!(signal_pattern(&[0.3, 0.7, 0.7, 0.3]), SignalPattern::Variable);
    }

    #[test]
    fn test_reliability_order() {
        assert!(SignalPattern::Stable.reliability() > SignalPattern::Increasing.reliability());
        assert!(SignalPattern::Variable.reliability() > SignalPattern::Unknown.reliability());
        assert_eq!(SignalPattern::Oscillating.to_string(), "oscillating");
    }
}
