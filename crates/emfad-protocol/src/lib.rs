//! EMFAD instrument wire protocol
//!
//! This crate provides types and utilities for talking to EMFAD electromagnetic
//! field instruments. It does no I/O: commands are encoded into byte frames and
//! received frames are decoded into typed records.
//!
//! # Protocol Overview
//!
//! Every message is wrapped in the same frame:
//!
//! - **Header** `0xAA55`, little-endian on the wire (`55 AA`)
//! - **Command / data-type byte**: a `CMD_*` opcode (host → instrument) or a
//!   `DATA_TYPE_*` tag (instrument → host)
//! - **Length** `N` and `N` payload bytes, multi-byte fields little-endian
//! - **Checksum**: XOR of every preceding byte
//! - **Footer** `0x55AA`, little-endian on the wire (`AA 55`)
//!
//! Commands that do not return data are answered with an acknowledgement that
//! echoes the opcode and carries a `RESP_*` code.
//!
//! # Example
//!
//! ```rust
//! use emfad_protocol::{decode_signal, encode_signal, validate_checksum, Command, Frequency};
//!
//! let frame = Command::SetFrequency(Frequency::F38k).encode();
//! assert!(validate_checksum(&frame));
//!
//! let reply = encode_signal(0, 0.75, 45.0, 19000.0, 23.5);
//! let sample = decode_signal(&reply)?;
//! assert_eq!(sample.signal_strength, 0.75);
//! # Ok::<(), emfad_protocol::DecodeError>(())
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod responses;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use types::*;
