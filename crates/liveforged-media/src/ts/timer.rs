//! PTS-driven segment boundary detection.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::packet::{
    duration_to_ticks, parse_packet, pts_delta, ticks_to_duration, PacketInfo, PACKET_SIZE,
    PTS_MASK, SYNC_BYTE,
};

/// Output of [`TsTimer::push`], in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsEvent {
    /// Bytes belonging to the current segment.
    Data(Bytes),
    /// The current segment ends here; following data starts a new one.
    Cut {
        /// Media time covered by the segment that just ended.
        duration: Duration,
    },
}

/// Splits a transport stream into segments of a target media duration.
///
/// Bytes are regrouped into whole packets; a trailing partial packet is held
/// back until the next [`push`](Self::push). The clock is the first
/// audio/video PID seen carrying a PTS. Once that stream has flagged any
/// packet as random access, cuts are only placed before random-access
/// packets so every segment starts on a keyframe.
#[derive(Debug)]
pub struct TsTimer {
    target_ticks: u64,
    pending: BytesMut,
    clock_pid: Option<u16>,
    keyframes_flagged: bool,
    segment_start: Option<u64>,
    last_pts: Option<u64>,
    unsynced_bytes: u64,
}

impl TsTimer {
    /// Create a timer cutting roughly every `target` of media time.
    pub fn new(target: Duration) -> Self {
        Self {
            target_ticks: duration_to_ticks(target).max(1),
            pending: BytesMut::new(),
            clock_pid: None,
            keyframes_flagged: false,
            segment_start: None,
            last_pts: None,
            unsynced_bytes: 0,
        }
    }

    /// Feed a chunk of the stream.
    ///
    /// Bytes that cannot be parsed as packets are passed through as data so
    /// that nothing written by the producer is dropped.
    pub fn push(&mut self, chunk: Bytes) -> Vec<TsEvent> {
        let buf = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(&chunk);
            self.pending.split().freeze()
        };

        let mut events = Vec::new();
        let mut run_start = 0;
        let mut pos = 0;

        while pos + PACKET_SIZE <= buf.len() {
            match parse_packet(&buf[pos..pos + PACKET_SIZE]) {
                Ok(info) => {
                    if let Some(duration) = self.observe(&info) {
                        if pos > run_start {
                            events.push(TsEvent::Data(buf.slice(run_start..pos)));
                        }
                        events.push(TsEvent::Cut { duration });
                        run_start = pos;
                    }
                    pos += PACKET_SIZE;
                }
                Err(_) => {
                    let next = buf[pos + 1..]
                        .iter()
                        .position(|&b| b == SYNC_BYTE)
                        .map(|i| pos + 1 + i)
                        .unwrap_or(buf.len());
                    self.unsynced_bytes += (next - pos) as u64;
                    pos = next;
                }
            }
        }

        if pos > run_start {
            events.push(TsEvent::Data(buf.slice(run_start..pos)));
        }
        if pos < buf.len() {
            self.pending.extend_from_slice(&buf[pos..]);
        }

        events
    }

    /// Media time elapsed in the current segment, if any PTS has been seen.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.segment_start, self.last_pts) {
            (Some(start), Some(last)) => Some(ticks_to_duration(pts_delta(start, last))),
            _ => None,
        }
    }

    /// Take the held-back partial packet, e.g. at end of stream.
    pub fn take_pending(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    /// Number of bytes held back waiting for the rest of a packet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bytes passed through outside packet alignment so far.
    pub fn unsynced_bytes(&self) -> u64 {
        self.unsynced_bytes
    }

    /// Forget all timing state and drop any partial packet.
    ///
    /// Returns the number of dropped bytes.
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.clock_pid = None;
        self.keyframes_flagged = false;
        self.segment_start = None;
        self.last_pts = None;
        dropped
    }

    fn observe(&mut self, info: &PacketInfo) -> Option<Duration> {
        let pes = info.pes?;
        let pts = pes.pts?;

        match self.clock_pid {
            None if pes.is_video() || pes.is_audio() => self.clock_pid = Some(info.pid),
            Some(pid) if pid == info.pid => {}
            _ => return None,
        }

        if info.random_access {
            self.keyframes_flagged = true;
        }

        let Some(start) = self.segment_start else {
            self.segment_start = Some(pts);
            self.last_pts = Some(pts);
            return None;
        };

        let elapsed = pts_delta(start, pts);
        if elapsed > PTS_MASK / 2 {
            // Timestamps stepped backwards; keep the time already covered.
            let covered = self.last_pts.map(|last| pts_delta(start, last)).unwrap_or(0);
            self.segment_start = Some(pts.wrapping_sub(covered) & PTS_MASK);
            self.last_pts = Some(pts);
            return None;
        }

        self.last_pts = Some(pts);

        let eligible = info.random_access || !self.keyframes_flagged;
        if eligible && elapsed >= self.target_ticks {
            self.segment_start = Some(pts);
            return Some(ticks_to_duration(elapsed));
        }

        None
    }
}
