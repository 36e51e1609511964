//! MPEG transport stream handling.
//!
//! Only what segmenting needs is parsed: packet headers, the adaptation
//! field random-access flag and PES presentation timestamps. Payloads are
//! never rewritten.

pub mod packet;
mod timer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use packet::{
    duration_to_ticks, parse_packet, ticks_to_duration, PacketInfo, PesStart, PACKET_SIZE,
    PTS_CLOCK_HZ, SYNC_BYTE,
};
pub use timer::{TsEvent, TsTimer};
