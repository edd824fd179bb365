//! # Miner API Protocol Library
//!
//! This crate implements the request/reply framing of the API socket that mining-rig
//! monitoring daemons (cgminer and its forks) expose on TCP port 4028.
//!
//! ## Overview
//!
//! The API is a strict single-shot protocol: a client connects, writes one request,
//! reads one reply and the daemon closes the connection. There is no length prefix
//! and no terminator on the request; the reply is padded with NUL bytes.
//! This library provides:
//!
//! - Encoding of requests as JSON objects or as plain command text
//! - Reading replies with one of three [`Drain`] strategies
//! - NUL stripping and JSON decoding of replies
//! - Parsing of the plain text reply format and of the STATUS section
//!
//! ## Basic Usage
//!
//! ### Encoding a Request
//!
//! ```
//! use minerapi_protocol::{ApiRequest, ParameterPolicy, RequestEncoding};
//!
//! let request = ApiRequest::parse("pga|0", '|');
//! let bytes = request.to_bytes(RequestEncoding::Json(ParameterPolicy::OmitWhenAbsent))?;
//! assert_eq!(bytes, br#"{"command":"pga","parameter":"0"}"#);
//!
//! let request = ApiRequest::parse("summary", '|');
//! let bytes = request.to_bytes(RequestEncoding::Json(ParameterPolicy::AlwaysPresent))?;
//! assert_eq!(bytes, br#"{"command":"summary","parameter":""}"#);
//! # Ok::<(), serde_json::Error>(())
//! ```
//!
//! ### Reading a Reply
//!
//! ```
//! use minerapi_protocol::{Drain, codec::decode_json_reply};
//! use std::io::Cursor;
//!
//! let mut socket = Cursor::new(b"{\"STATUS\":[{\"STATUS\":\"S\"}],\"id\":1}\0".to_vec());
//! let raw = Drain::until_close().read_from(&mut socket).expect("Reading from a cursor shouldn't fail");
//! let reply = decode_json_reply(&raw).expect("Reply should parse");
//! assert_eq!(reply["id"], 1);
//! ```
//!
//! ## Drain Strategies
//!
//! - **UntilClose**: read 4096 byte chunks until the daemon closes the connection
//! - **SingleRead**: one read of at most 1024 bytes; longer replies are truncated
//! - **UntilNul**: read until the daemon closes or a chunk ends with the NUL terminator
//!
//! ## Error Handling
//!
//! Reply interpretation errors are reported as [`error::ReplyError`].
//! I/O failures while draining are reported as [`error::DrainError`], which keeps track
//! of how much of the reply had arrived.
//!
//! ## Async Support
//!
//! With the `tokio` feature, [`codec::ReplyCodec`] implements the `tokio-util`
//! `Encoder` and `Decoder` traits for the same framing.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
