//! Segment files and the writer that cuts them.

mod storage;
mod writer;

pub use storage::{FsStorage, SegmentSink, SegmentStorage, PLAYLIST_FILE};
pub use writer::{SegmentWriter, WriterCommand, WriterStats};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// A committed, immutable media segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub sequence: u64,
    pub duration: Duration,
    pub size: u64,
    /// File name relative to the stream directory.
    pub uri: String,
    pub created_at: DateTime<Utc>,
    /// First segment produced after a worker restart.
    pub discontinuity: bool,
}

/// File name of segment `sequence`.
pub fn segment_file_name(sequence: u64) -> String {
    format!("seg-{}.ts", sequence)
}

/// Inverse of [`segment_file_name`]; `None` for anything else.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("seg-")?.strip_suffix(".ts")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_names() {
        assert_eq!(segment_file_name(7), "seg-7.ts");
        assert_eq!(parse_segment_file_name("seg-7.ts"), Some(7));
        assert_eq!(parse_segment_file_name("seg-.ts"), None);
        assert_eq!(parse_segment_file_name("seg-+7.ts"), None);
        assert_eq!(parse_segment_file_name("seg-7.ts.part"), None);
        assert_eq!(parse_segment_file_name("../seg-7.ts"), None);
        assert_eq!(parse_segment_file_name("playlist.m3u8"), None);
    }
}
