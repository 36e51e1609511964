//! Live media playlist.

use std::fmt::Write;
use std::time::Duration;

/// MIME type for m3u8 responses.
pub const CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// A single segment reference in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    /// Segment duration.
    pub duration: Duration,
    /// URI relative to the playlist.
    pub uri: String,
    /// Emit `#EXT-X-DISCONTINUITY` before this entry.
    pub discontinuity: bool,
}

/// A live (sliding window) HLS media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Maximum segment duration in integer seconds (rounded up).
    pub target_duration: u64,
    /// Sequence number of the first entry.
    pub media_sequence: u64,
    /// Number of discontinuities that scrolled out of the window.
    pub discontinuity_sequence: u64,
    /// Ordered entries.
    pub entries: Vec<PlaylistEntry>,
    /// Whether the stream is over (`#EXT-X-ENDLIST`).
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create an empty live playlist.
    pub fn live(target_duration: u64, media_sequence: u64) -> Self {
        Self {
            target_duration,
            media_sequence,
            discontinuity_sequence: 0,
            entries: Vec::new(),
            ended: false,
        }
    }

    /// Target duration for a set of segment durations: the longest one
    /// rounded up to whole seconds, never below `floor`.
    pub fn target_duration_for<'a>(
        floor: Duration,
        durations: impl IntoIterator<Item = &'a Duration>,
    ) -> u64 {
        durations
            .into_iter()
            .map(|d| ceil_secs(*d))
            .chain(std::iter::once(ceil_secs(floor)))
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Render to m3u8 text.
    ///
    /// Output includes:
    /// - `#EXTM3U` header and `#EXT-X-VERSION:3`
    /// - `#EXT-X-TARGETDURATION` and `#EXT-X-MEDIA-SEQUENCE`
    /// - `#EXT-X-DISCONTINUITY-SEQUENCE` once discontinuities have scrolled out
    /// - `#EXTINF` for each entry, preceded by `#EXT-X-DISCONTINUITY` when flagged
    /// - `#EXT-X-ENDLIST` when ended
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();
        if self.discontinuity_sequence > 0 {
            writeln!(
                out,
                "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
                self.discontinuity_sequence
            )
            .unwrap();
        }

        for entry in &self.entries {
            if entry.discontinuity {
                writeln!(out, "#EXT-X-DISCONTINUITY").unwrap();
            }
            writeln!(out, "#EXTINF:{:.6},", entry.duration.as_secs_f64()).unwrap();
            writeln!(out, "{}", entry.uri).unwrap();
        }

        if self.ended {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }
}

fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs() + 1
    } else {
        d.as_secs()
    }
}
