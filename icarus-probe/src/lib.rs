//! # Icarus Probe
//!
//! A small library to check Icarus-class FPGA mining devices over their serial link.
//!
//! ## Overview
//!
//! An Icarus device has no framing on its serial line. It accepts a 64 byte work unit
//! (midstate followed by the last 12 bytes of block data, padded to 32 bytes, each half in
//! reversed byte order) and answers with the four byte nonce it found, or stays silent.
//!
//! This crate provides:
//!
//! - [`IcarusPayload`]: construction of the 64 byte work unit from hex strings
//! - [`fixtures`]: two test vectors with known answers (`063c5e01` and `8e0b31c5`)
//! - [`encode_tokens`]: raw payloads from `0x`-prefixed hex and text tokens
//! - [`SerialProbe`]: a single session on the serial link (115200 8N1)
//!
//! ## Basic Usage
//!
//! ### Building a Work Unit
//!
//! ```
//! use icarus_probe::fixtures;
//!
//! let [first, _second] = fixtures().expect("Fixtures should decode");
//! assert_eq!(first.payload.as_bytes().len(), 64);
//! assert_eq!(first.expected, [0x06, 0x3c, 0x5e, 0x01]);
//! ```
//!
//! ### Sending Raw Data
//!
//! ```
//! use icarus_probe::encode_tokens;
//!
//! let payload = encode_tokens(&["0x68656c6c6f", "world"]).expect("Tokens should encode");
//! assert_eq!(payload, b"helloworld");
//! ```
//!
//! ### Checking a Device
//!
//! ```ignore
//! use icarus_probe::{SerialConfig, SerialProbe};
//!
//! let mut probe = SerialProbe::open("/dev/ttyUSB0", &SerialConfig::default())?;
//! for result in probe.send_icarus_fixture()? {
//!     println!("expected {:02x?}, got {:02x?}", result.expected, result.received);
//! }
//! probe.close();
//! ```
//!
//! ## Timeouts
//!
//! Replies are bounded by the configured timeout. A device that answers with fewer bytes
//! than expected, or not at all, yields a short or empty reply rather than an error.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Payloads are logged at `info`, byte dumps at `trace`.
pub mod error;
pub mod payload;
pub mod probe;

pub use error::{EncodingError, ProbeError};
pub use payload::{Fixture, IcarusPayload, encode_tokens, fixtures};
pub use probe::{Builder, FixtureResult, SerialConfig, SerialProbe};
