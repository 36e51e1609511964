//! Synthetic transport stream builders for tests.

use super::packet::{PACKET_SIZE, PTS_CLOCK_HZ, SYNC_BYTE};

pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;
pub const VIDEO_STREAM_ID: u8 = 0xE0;
pub const AUDIO_STREAM_ID: u8 = 0xC0;

/// A packet starting a PES on `pid`, optionally carrying a PTS and a
/// random-access adaptation field.
pub fn pes_packet(pid: u16, stream_id: u8, pts: Option<u64>, random_access: bool) -> Vec<u8> {
    let mut packet = header(pid, true, random_access);

    packet.extend_from_slice(&[0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80]);
    match pts {
        Some(pts) => {
            packet.extend_from_slice(&[0x80, 0x05]);
            packet.extend_from_slice(&encode_timestamp(pts));
        }
        None => packet.extend_from_slice(&[0x00, 0x00]),
    }

    packet.resize(PACKET_SIZE, 0xFF);
    packet
}

/// A payload-only packet continuing a PES on `pid`.
pub fn continuation_packet(pid: u16) -> Vec<u8> {
    let mut packet = header(pid, false, false);
    packet.resize(PACKET_SIZE, 0xAB);
    packet
}

/// `frames` video frames at `fps`, a keyframe every `gop` frames, each frame
/// one PES start packet plus one continuation packet.
pub fn video_stream(frames: usize, fps: u64, gop: usize, start_pts: u64) -> Vec<u8> {
    let ticks_per_frame = PTS_CLOCK_HZ / fps;
    let mut out = Vec::with_capacity(frames * PACKET_SIZE * 2);
    for n in 0..frames {
        let pts = start_pts + n as u64 * ticks_per_frame;
        out.extend(pes_packet(VIDEO_PID, VIDEO_STREAM_ID, Some(pts), n % gop == 0));
        out.extend(continuation_packet(VIDEO_PID));
    }
    out
}

fn header(pid: u16, payload_unit_start: bool, random_access: bool) -> Vec<u8> {
    let mut packet = Vec::with_capacity(PACKET_SIZE);
    let pusi = if payload_unit_start { 0x40 } else { 0x00 };
    packet.push(SYNC_BYTE);
    packet.push(pusi | ((pid >> 8) as u8 & 0x1F));
    packet.push((pid & 0xFF) as u8);
    if random_access {
        packet.extend_from_slice(&[0x30, 0x01, 0x40]);
    } else {
        packet.push(0x10);
    }
    packet
}

fn encode_timestamp(pts: u64) -> [u8; 5] {
    [
        0x21 | ((pts >> 29) & 0x0E) as u8,
        ((pts >> 22) & 0xFF) as u8,
        0x01 | ((pts >> 14) & 0xFE) as u8,
        ((pts >> 7) & 0xFF) as u8,
        0x01 | ((pts << 1) & 0xFE) as u8,
    ]
}
