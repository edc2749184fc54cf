//! Spectrum sweep files.
//!
//! One point per line, `frequency,sample` or `frequency sample`. Blank lines
//! and `#` comments are ignored.

use std::path::Path;

use thiserror::Error;

/// Errors reading a sweep file.
#[derive(Debug, Error)]
pub enum InputError {
    /// I/O error reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line could not be parsed.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },

    /// The file holds no points.
    #[error("no sweep points found")]
    Empty,
}

/// Frequencies and samples of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepInput {
    /// Point frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// Point samples.
    pub samples: Vec<f64>,
}

impl SweepInput {
    /// Read and parse a sweep file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse sweep text.
    pub fn parse(text: &str) -> Result<Self, InputError> {
        let mut input = SweepInput::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .collect();
            let [frequency, sample] = fields[..] else {
                return Err(InputError::Parse {
                    line: idx + 1,
                    message: format!("expected 2 fields, found {}", fields.len()),
                });
            };
            input.frequencies.push(parse_field(frequency, idx + 1)?);
            input.samples.push(parse_field(sample, idx + 1)?);
        }
        if input.samples.is_empty() {
            return Err(InputError::Empty);
        }
        Ok(input)
    }
}

fn parse_field(field: &str, line: usize) -> Result<f64, InputError> {
    let value: f64 = field.parse().map_err(|_| InputError::Parse {
        line,
        message: format!("'{}' is not a number", field),
    })?;
    if !value.is_finite() {
        return Err(InputError::Parse {
            line,
            message: format!("'{}' is not finite", field),
        });
    }
    Ok(value)
}
