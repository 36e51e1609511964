//! Liveforged - live stream relay
//!
//! A producer publishes a stream under a name; the relay runs it through a
//! supervised transcoder, cuts the MPEG-TS output into fixed-duration
//! segments and keeps a rolling HLS playlist for viewers.
//!
//! This library crate exposes the relay for the binary and for integration
//! testing.

pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod playlist;
pub mod relay;
pub mod segment;
pub mod server;
pub mod transcode;

pub use error::{Error, Result};
