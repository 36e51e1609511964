//! Maintains the rolling window of a stream's segments.
//!
//! The manager owns the only mutable copy of a playlist. Readers get an
//! `Arc` snapshot that is swapped in whole after each change, so they
//! never see a half-applied append or eviction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use liveforged_media::{MediaPlaylist, PlaylistEntry};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::events::{EventBus, EventPayload};
use crate::segment::{Segment, SegmentStorage};

/// How many segments the playlist keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep segments while their total duration fits in the window.
    Duration(Duration),
    /// Keep at most this many segments.
    Count(usize),
}

impl Retention {
    fn exceeded(&self, segments: &VecDeque<Segment>) -> bool {
        match *self {
            Retention::Duration(window) => {
                segments.iter().map(|s| s.duration).sum::<Duration>() > window
            }
            Retention::Count(max) => segments.len() > max,
        }
    }
}

/// Immutable view of a playlist at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaylistSnapshot {
    /// Sequence number of the first retained segment.
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub segments: Vec<Segment>,
    pub target_duration: u64,
    pub ended: bool,
}

impl PlaylistSnapshot {
    pub fn to_media_playlist(&self) -> MediaPlaylist {
        MediaPlaylist {
            target_duration: self.target_duration,
            media_sequence: self.media_sequence,
            discontinuity_sequence: self.discontinuity_sequence,
            entries: self
                .segments
                .iter()
                .map(|s| PlaylistEntry {
                    duration: s.duration,
                    uri: s.uri.clone(),
                    discontinuity: s.discontinuity,
                })
                .collect(),
            ended: self.ended,
        }
    }

    pub fn render(&self) -> String {
        self.to_media_playlist().render()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }
}

#[derive(Debug)]
struct State {
    segments: VecDeque<Segment>,
    media_sequence: u64,
    discontinuity_sequence: u64,
    last_sequence: u64,
    /// Only ever grows; players must not see it shrink mid-stream.
    target_duration: u64,
    ended: bool,
}

pub struct PlaylistManager {
    stream: String,
    storage: Arc<dyn SegmentStorage>,
    retention: Retention,
    segment_duration: Duration,
    events: Arc<EventBus>,
    state: Mutex<State>,
    snapshot: RwLock<Arc<PlaylistSnapshot>>,
}

impl PlaylistManager {
    pub fn new(
        stream: impl Into<String>,
        storage: Arc<dyn SegmentStorage>,
        retention: Retention,
        segment_duration: Duration,
        events: Arc<EventBus>,
    ) -> Self {
        let target_duration = MediaPlaylist::target_duration_for(segment_duration, std::iter::empty());
        Self {
            stream: stream.into(),
            storage,
            retention,
            segment_duration,
            events,
            state: Mutex::new(State {
                segments: VecDeque::new(),
                media_sequence: 1,
                discontinuity_sequence: 0,
                last_sequence: 0,
                target_duration,
                ended: false,
            }),
            snapshot: RwLock::new(Arc::new(PlaylistSnapshot {
                media_sequence: 1,
                target_duration,
                ..Default::default()
            })),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Latest published playlist.
    pub fn current_playlist(&self) -> Arc<PlaylistSnapshot> {
        self.snapshot.read().clone()
    }

    /// Add a committed segment and evict what falls out of the window.
    pub async fn append(&self, segment: Segment) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.ended {
            tracing::warn!(
                stream = %self.stream,
                sequence = segment.sequence,
                "Ignoring segment appended after playlist ended"
            );
            return Ok(());
        }
        if segment.sequence != state.last_sequence + 1 {
            return Err(Error::Internal(format!(
                "segment {} appended to {} out of order (expected {})",
                segment.sequence,
                self.stream,
                state.last_sequence + 1
            )));
        }

        let sequence = segment.sequence;
        let duration = segment.duration;
        let size = segment.size;
        state.last_sequence = sequence;
        state.target_duration = MediaPlaylist::target_duration_for(
            self.segment_duration,
            [&duration],
        )
        .max(state.target_duration);
        state.segments.push_back(segment);

        let mut evicted = Vec::new();
        while state.segments.len() > 1 && self.retention.exceeded(&state.segments) {
            if let Some(old) = state.segments.pop_front() {
                state.media_sequence = old.sequence + 1;
                if old.discontinuity {
                    state.discontinuity_sequence += 1;
                }
                evicted.push(old.sequence);
            }
        }

        self.publish(&state).await?;

        self.events.broadcast(EventPayload::SegmentCompleted {
            stream: self.stream.clone(),
            sequence,
            duration_secs: duration.as_secs_f64(),
            size,
        });

        if !evicted.is_empty() {
            for &old in &evicted {
                if let Err(e) = self.storage.delete_segment(&self.stream, old).await {
                    tracing::warn!(
                        stream = %self.stream,
                        sequence = old,
                        "Failed to delete evicted segment: {}",
                        e
                    );
                }
            }
            tracing::debug!(stream = %self.stream, evicted = ?evicted, "Evicted segments");
            self.events.broadcast(EventPayload::SegmentsEvicted {
                stream: self.stream.clone(),
                sequences: evicted,
            });
        }

        Ok(())
    }

    /// Mark the playlist ended and write it one last time.
    ///
    /// Returns `false` if it had already ended.
    pub async fn finish(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.ended {
            return Ok(false);
        }
        state.ended = true;
        self.publish(&state).await?;
        tracing::debug!(stream = %self.stream, "Playlist ended");
        Ok(true)
    }

    /// Append segments until the channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<Segment>) -> Result<()> {
        while let Some(segment) = rx.recv().await {
            self.append(segment).await?;
        }
        Ok(())
    }

    /// Swap in a new snapshot, then persist it.
    async fn publish(&self, state: &State) -> Result<()> {
        let segments: Vec<Segment> = state.segments.iter().cloned().collect();
        let snapshot = Arc::new(PlaylistSnapshot {
            media_sequence: state.media_sequence,
            discontinuity_sequence: state.discontinuity_sequence,
            segments,
            target_duration: state.target_duration,
            ended: state.ended,
        });
        let text = snapshot.render();

        *self.snapshot.write() = snapshot;

        self.storage
            .write_playlist(&self.stream, &text)
            .await
            .map_err(|e| Error::write(&self.stream, e))
    }
}
