//! Transport packet header and PES timestamp parsing.

use std::time::Duration;

use crate::error::{Error, Result};

/// Size of one transport stream packet.
pub const PACKET_SIZE: usize = 188;

/// First byte of every transport stream packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Clock rate of PTS/DTS values.
pub const PTS_CLOCK_HZ: u64 = 90_000;

/// PTS values are 33 bits wide and wrap around.
pub const PTS_MASK: u64 = (1 << 33) - 1;

/// Header fields of a single transport packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Packet identifier.
    pub pid: u16,
    /// Set when a PES packet or PSI section starts in this packet.
    pub payload_unit_start: bool,
    /// Adaptation field random_access_indicator (keyframe marker).
    pub random_access: bool,
    /// PES header, when this packet starts one.
    pub pes: Option<PesStart>,
}

/// The start of a PES packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesStart {
    pub stream_id: u8,
    /// Presentation timestamp in 90 kHz ticks.
    pub pts: Option<u64>,
}

impl PesStart {
    pub fn is_video(&self) -> bool {
        (0xE0..=0xEF).contains(&self.stream_id)
    }

    pub fn is_audio(&self) -> bool {
        (0xC0..=0xDF).contains(&self.stream_id)
    }
}

/// Parse the header of one 188-byte transport packet.
///
/// # Errors
///
/// - [`Error::BufferUnderflow`] if fewer than 188 bytes are given
/// - [`Error::LostSync`] if the first byte is not `0x47`
/// - [`Error::InvalidPacket`] if the adaptation field overruns the packet
pub fn parse_packet(packet: &[u8]) -> Result<PacketInfo> {
    if packet.len() < PACKET_SIZE {
        return Err(Error::BufferUnderflow {
            need: PACKET_SIZE,
            have: packet.len(),
        });
    }
    if packet[0] != SYNC_BYTE {
        return Err(Error::LostSync { found: packet[0] });
    }

    let payload_unit_start = packet[1] & 0x40 != 0;
    let pid = u16::from(packet[1] & 0x1f) << 8 | u16::from(packet[2]);
    let adaptation_control = (packet[3] >> 4) & 0x03;

    let mut offset = 4;
    let mut random_access = false;
    if adaptation_control & 0x02 != 0 {
        let field_len = packet[4] as usize;
        if 5 + field_len > PACKET_SIZE {
            return Err(Error::invalid_packet(format!(
                "adaptation field length {} overruns packet",
                field_len
            )));
        }
        if field_len > 0 {
            random_access = packet[5] & 0x40 != 0;
        }
        offset = 5 + field_len;
    }

    let has_payload = adaptation_control & 0x01 != 0;
    let pes = if has_payload && payload_unit_start {
        parse_pes_start(&packet[offset..PACKET_SIZE])
    } else {
        None
    };

    Ok(PacketInfo {
        pid,
        payload_unit_start,
        random_access,
        pes,
    })
}

fn parse_pes_start(payload: &[u8]) -> Option<PesStart> {
    // PSI sections (PAT/PMT) also set payload_unit_start but carry no start code.
    if payload.len() < 6 || payload[..3] != [0x00, 0x00, 0x01] {
        return None;
    }

    let stream_id = payload[3];
    if !has_optional_header(stream_id) || payload.len() < 9 {
        return Some(PesStart {
            stream_id,
            pts: None,
        });
    }

    let pts_dts_flags = payload[7] >> 6;
    let pts = if pts_dts_flags & 0x02 != 0 && payload.len() >= 14 {
        Some(decode_timestamp(&payload[9..14]))
    } else {
        None
    };

    Some(PesStart { stream_id, pts })
}

/// Stream ids without the optional PES header (ISO/IEC 13818-1, table 2-21).
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

/// Decode a 5-byte PTS/DTS field.
pub fn decode_timestamp(b: &[u8]) -> u64 {
    (u64::from(b[0] >> 1) & 0x07) << 30
        | u64::from(b[1]) << 22
        | u64::from(b[2] >> 1) << 15
        | u64::from(b[3]) << 7
        | u64::from(b[4] >> 1)
}

/// Distance from `from` to `to` on the 33-bit PTS clock.
pub fn pts_delta(from: u64, to: u64) -> u64 {
    to.wrapping_sub(from) & PTS_MASK
}

/// Convert 90 kHz ticks to a [`Duration`].
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(100_000) / 9)
}

/// Convert a [`Duration`] to 90 kHz ticks (truncating).
pub fn duration_to_ticks(d: Duration) -> u64 {
    (d.as_nanos() * 9 / 100_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::testing::{continuation_packet, pes_packet, VIDEO_STREAM_ID};

    #[test]
    fn test_parse_pes_start_with_pts() {
        let packet = pes_packet(0x100, VIDEO_STREAM_ID, Some(123_456), true);
        let info = parse_packet(&packet).unwrap();

        assert_eq!(info.pid, 0x100);
        assert!(info.payload_unit_start);
        assert!(info.random_access);
        let pes = info.pes.unwrap();
        assert!(pes.is_video());
        assert_eq!(pes.pts, Some(123_456));
    }

    #[test]
    fn test_parse_continuation_packet() {
        let packet = continuation_packet(0x101);
        let info = parse_packet(&packet).unwrap();

        assert_eq!(info.pid, 0x101);
        assert!(!info.payload_unit_start);
        assert!(!info.random_access);
        assert!(info.pes.is_none());
    }

    #[test]
    fn test_parse_large_pts_roundtrips_all_33_bits() {
        let pts = PTS_MASK - 7;
        let packet = pes_packet(0x100, VIDEO_STREAM_ID, Some(pts), false);
        let info = parse_packet(&packet).unwrap();
        assert_eq!(info.pes.unwrap().pts, Some(pts));
    }

    #[test]
    fn test_lost_sync() {
        let mut packet = continuation_packet(0x100);
        packet[0] = 0x00;
        assert!(matches!(
            parse_packet(&packet),
            Err(Error::LostSync { found: 0x00 })
        ));
    }

    #[test]
    fn test_short_buffer() {
        let err = parse_packet(&[SYNC_BYTE; 10]).unwrap_err();
        assert!(matches!(err, Error::BufferUnderflow { need: 188, have: 10 }));
    }

    #[test]
    fn test_psi_section_is_not_pes() {
        // PAT: PID 0, payload_unit_start, pointer field then table id 0.
        let mut packet = vec![0xFFu8; PACKET_SIZE];
        packet[..5].copy_from_slice(&[SYNC_BYTE, 0x40, 0x00, 0x10, 0x00]);
        packet[5] = 0x00;
        let info = parse_packet(&packet).unwrap();
        assert!(info.payload_unit_start);
        assert!(info.pes.is_none());
    }

    #[test]
    fn test_pts_delta_wraps() {
        assert_eq!(pts_delta(PTS_MASK - 9, 10), 20);
        assert_eq!(pts_delta(100, 190), 90);
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(ticks_to_duration(PTS_CLOCK_HZ), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(360_000), Duration::from_secs(4));
        assert_eq!(duration_to_ticks(Duration::from_millis(1500)), 135_000);
    }
}
