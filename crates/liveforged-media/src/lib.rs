//! Liveforged-Media: MPEG-TS timing and HLS playlist rendering
//!
//! This crate holds the format-level pieces of the relay that do not depend
//! on the async runtime or on storage.
//!
//! # Modules
//!
//! - `ts` - MPEG transport stream packet parsing and the PTS-driven segment timer
//! - `hls` - HLS media playlist model and m3u8 rendering
//!
//! # Segment timing
//!
//! The transcoder writes MPEG-TS to its stdout. The relay cuts that byte
//! stream into segments without remuxing:
//!
//! 1. Bytes are regrouped into whole 188-byte transport packets
//! 2. PES headers on the clock stream yield presentation timestamps
//! 3. A cut is placed before the first PES start (keyframe when flagged)
//!    whose PTS is at least one target duration past the segment start

pub mod error;
pub mod hls;
pub mod ts;

pub use error::{Error, Result};
pub use hls::{MediaPlaylist, PlaylistEntry};
pub use ts::{TsEvent, TsTimer};
