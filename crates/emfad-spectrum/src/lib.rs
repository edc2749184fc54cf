//! Spectrum analysis for EMFAD signal series.
//!
//! [`analyze`] turns a sample series and its bin frequencies into a windowed
//! power [`Spectrum`]; [`find_peaks`] locates local maxima; and
//! [`analyze_material`] combines the spectrum with the recent signal
//! [`SignalPattern`] into a coarse [`MaterialType`] guess.
//!
//! ```
//! use emfad_spectrum::{analyze, find_peaks};
//!
//! let freqs = [19e3, 38e3, 57e3, 76e3, 95e3, 114e3, 135e3];
//! let peaks = find_peaks(&[0.0, 1.0, 0.2, 1.0, 0.05, 2.0, 0.1], &freqs).unwrap();
//! assert_eq!(peaks[0].index, 5);
//!
//! let spectrum = analyze(&[0.2, 0.9, 0.4, 0.8, 0.1, 0.3, 0.2], &freqs).unwrap();
//! assert_eq!(spectrum.len(), 7);
//! ```
//!
//! Every function here is pure and allocation is proportional to the input.

mod analyzer;
mod material;
mod pattern;

pub use analyzer::*;
pub use material::*;
pub use pattern::*;
