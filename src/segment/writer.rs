//! Cuts a worker's transport stream output into segments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use liveforged_media::{TsEvent, TsTimer};
use tokio::sync::{mpsc, oneshot};

use super::{segment_file_name, Segment, SegmentSink, SegmentStorage};
use crate::config::TimingMode;
use crate::error::{Error, Result};

const MIN_SEGMENT_DURATION: Duration = Duration::from_millis(1);

/// Input to the writer, in worker output order.
#[derive(Debug)]
pub enum WriterCommand {
    /// A chunk of worker stdout.
    Data(Bytes),
    /// The worker died. Commit the in-flight segment, then acknowledge.
    Restart(oneshot::Sender<()>),
}

/// Totals reported when the writer finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub segments: u64,
    pub bytes: u64,
    /// Partial packets dropped on worker exits.
    pub discarded_bytes: u64,
}

enum Timing {
    Pts(TsTimer),
    Wallclock,
}

struct OpenSegment {
    sequence: u64,
    sink: Box<dyn SegmentSink>,
    size: u64,
    opened_at: Instant,
    discontinuity: bool,
}

pub struct SegmentWriter {
    stream: String,
    storage: Arc<dyn SegmentStorage>,
    target: Duration,
    timing: Timing,
    next_sequence: u64,
    current: Option<OpenSegment>,
    discontinuity_pending: bool,
    segments_tx: mpsc::Sender<Segment>,
    stats: WriterStats,
}

impl SegmentWriter {
    pub fn new(
        stream: impl Into<String>,
        storage: Arc<dyn SegmentStorage>,
        target: Duration,
        mode: TimingMode,
        segments_tx: mpsc::Sender<Segment>,
    ) -> Self {
        let timing = match mode {
            TimingMode::Pts => Timing::Pts(TsTimer::new(target)),
            TimingMode::Wallclock => Timing::Wallclock,
        };
        Self {
            stream: stream.into(),
            storage,
            target,
            timing,
            next_sequence: 1,
            current: None,
            discontinuity_pending: false,
            segments_tx,
            stats: WriterStats::default(),
        }
    }

    /// Consume commands until the channel closes, then commit the final
    /// segment.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WriterCommand>) -> Result<WriterStats> {
        let result = self.drive(&mut rx).await;
        if let Err(e) = result {
            if let Some(open) = self.current.take() {
                open.sink.abort().await;
            }
            tracing::error!(stream = %self.stream, "Segment writer failed: {}", e);
            return Err(e);
        }

        tracing::debug!(
            stream = %self.stream,
            segments = self.stats.segments,
            bytes = self.stats.bytes,
            "Segment writer finished"
        );
        Ok(self.stats)
    }

    async fn drive(&mut self, rx: &mut mpsc::Receiver<WriterCommand>) -> Result<()> {
        while let Some(command) = rx.recv().await {
            match command {
                WriterCommand::Data(bytes) => self.ingest(bytes).await?,
                WriterCommand::Restart(ack) => {
                    self.restart().await?;
                    let _ = ack.send(());
                }
            }
        }
        self.finalize().await
    }

    /// Append a chunk of worker output, closing segments as they fill up.
    pub async fn ingest(&mut self, bytes: Bytes) -> Result<()> {
        match &mut self.timing {
            Timing::Pts(timer) => {
                for event in timer.push(bytes) {
                    match event {
                        TsEvent::Data(data) => self.write(&data).await?,
                        TsEvent::Cut { duration } => self.close(Some(duration)).await?,
                    }
                }
            }
            Timing::Wallclock => {
                self.write(&bytes).await?;
                let full = self
                    .current
                    .as_ref()
                    .is_some_and(|open| open.opened_at.elapsed() >= self.target);
                if full {
                    self.close(None).await?;
                }
            }
        }
        Ok(())
    }

    /// Commit what the dead worker produced and start over with fresh timing.
    pub async fn restart(&mut self) -> Result<()> {
        let produced = self.current.is_some() || self.next_sequence > 1;
        self.close(None).await?;

        if let Timing::Pts(timer) = &mut self.timing {
            let dropped = timer.reset();
            if dropped > 0 {
                tracing::debug!(
                    stream = %self.stream,
                    dropped,
                    "Dropped partial packet from exited worker"
                );
                self.stats.discarded_bytes += dropped as u64;
            }
        }

        if produced {
            self.discontinuity_pending = true;
        }
        Ok(())
    }

    /// Commit the last segment at end of input.
    ///
    /// A packet cut short by the worker exiting is dropped, never published.
    pub async fn finalize(&mut self) -> Result<()> {
        if let Timing::Pts(timer) = &mut self.timing {
            let tail = timer.take_pending();
            if !tail.is_empty() {
                tracing::debug!(
                    stream = %self.stream,
                    dropped = tail.len(),
                    "Dropped incomplete trailing packet"
                );
                self.stats.discarded_bytes += tail.len() as u64;
            }
        }
        self.close(None).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if self.current.is_none() {
            let sequence = self.next_sequence;
            let sink = self
                .storage
                .create_segment(&self.stream, sequence)
                .await
                .map_err(|e| Error::write(&self.stream, e))?;
            self.current = Some(OpenSegment {
                sequence,
                sink,
                size: 0,
                opened_at: Instant::now(),
                discontinuity: std::mem::take(&mut self.discontinuity_pending),
            });
        }

        if let Some(open) = self.current.as_mut() {
            if let Err(e) = open.sink.write(data).await {
                return Err(Error::write(&self.stream, e));
            }
            open.size += data.len() as u64;
            self.stats.bytes += data.len() as u64;
        }
        Ok(())
    }

    /// Close the in-flight segment. `duration` comes from the timestamp
    /// clock when known; otherwise it is measured.
    async fn close(&mut self, duration: Option<Duration>) -> Result<()> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };

        if open.size == 0 {
            open.sink.abort().await;
            return Ok(());
        }

        let duration = duration
            .or_else(|| match &self.timing {
                Timing::Pts(timer) => timer.elapsed().filter(|d| !d.is_zero()),
                Timing::Wallclock => None,
            })
            .unwrap_or_else(|| open.opened_at.elapsed())
            .max(MIN_SEGMENT_DURATION);

        open.sink
            .commit()
            .await
            .map_err(|e| Error::write(&self.stream, e))?;

        let segment = Segment {
            sequence: open.sequence,
            duration,
            size: open.size,
            uri: segment_file_name(open.sequence),
            created_at: Utc::now(),
            discontinuity: open.discontinuity,
        };
        self.next_sequence = open.sequence + 1;
        self.stats.segments += 1;

        tracing::debug!(
            stream = %self.stream,
            sequence = segment.sequence,
            duration = ?segment.duration,
            size = segment.size,
            "Segment committed"
        );

        self.segments_tx
            .send(segment)
            .await
            .map_err(|_| Error::Internal(format!("playlist for {} is gone", self.stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::FsStorage;
    use liveforged_media::ts::testing::video_stream;
    use liveforged_media::ts::PACKET_SIZE;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        writer: SegmentWriter,
        segments: mpsc::Receiver<Segment>,
    }

    async fn fixture(mode: TimingMode) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let storage = FsStorage::new(&root);
        storage.prepare("alpha").await.unwrap();
        let (tx, rx) = mpsc::channel(64);
        let writer = SegmentWriter::new(
            "alpha",
            Arc::new(storage),
            Duration::from_secs(4),
            mode,
            tx,
        );
        Fixture {
            _dir: dir,
            root,
            writer,
            segments: rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Segment>) -> Vec<Segment> {
        let mut out = Vec::new();
        while let Ok(segment) = rx.try_recv() {
            out.push(segment);
        }
        out
    }

    #[tokio::test]
    async fn test_cuts_on_pts_boundaries() {
        let mut f = fixture(TimingMode::Pts).await;
        // 10 s at 25 fps, keyframe every second.
        let stream = video_stream(250, 25, 25, 90_000);
        for chunk in stream.chunks(1000) {
            f.writer.ingest(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        f.writer.finalize().await.unwrap();

        let segments = drain(&mut f.segments);
        let sequences: Vec<u64> = segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(segments[0].duration, Duration::from_secs(4));
        assert_eq!(segments[1].duration, Duration::from_secs(4));
        // Last segment: last PTS minus first PTS.
        assert_eq!(segments[2].duration, Duration::from_millis(1960));

        let total: u64 = segments.iter().map(|s| s.size).sum();
        assert_eq!(total, stream.len() as u64);
        for segment in &segments {
            assert_eq!(segment.size % PACKET_SIZE as u64, 0);
            let on_disk = std::fs::metadata(f.root.join("alpha").join(&segment.uri)).unwrap();
            assert_eq!(on_disk.len(), segment.size);
        }
    }

    #[tokio::test]
    async fn test_restart_flags_discontinuity() {
        let mut f = fixture(TimingMode::Pts).await;
        let first = video_stream(50, 25, 25, 0);
        f.writer.ingest(Bytes::from(first)).await.unwrap();
        // Half a packet from the dying worker.
        f.writer.ingest(Bytes::from(vec![0x47; 100])).await.unwrap();
        f.writer.restart().await.unwrap();

        let second = video_stream(50, 25, 25, 5_000_000);
        f.writer.ingest(Bytes::from(second)).await.unwrap();
        f.writer.finalize().await.unwrap();

        let segments = drain(&mut f.segments);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].sequence, 1);
        assert!(!segments[0].discontinuity);
        assert_eq!(segments[1].sequence, 2);
        assert!(segments[1].discontinuity);
        assert_eq!(segments[1].duration, Duration::from_millis(1960));
        assert_eq!(f.writer.stats.discarded_bytes, 100);
    }

    #[tokio::test]
    async fn test_restart_before_output_is_not_a_discontinuity() {
        let mut f = fixture(TimingMode::Pts).await;
        f.writer.restart().await.unwrap();
        f.writer
            .ingest(Bytes::from(video_stream(10, 25, 25, 0)))
            .await
            .unwrap();
        f.writer.finalize().await.unwrap();

        let segments = drain(&mut f.segments);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].sequence, 1);
        assert!(!segments[0].discontinuity);
    }

    #[tokio::test]
    async fn test_empty_input_produces_nothing() {
        let mut f = fixture(TimingMode::Pts).await;
        f.writer.finalize().await.unwrap();
        assert!(drain(&mut f.segments).is_empty());
    }

    #[tokio::test]
    async fn test_trailing_partial_packet_dropped_at_end() {
        let mut f = fixture(TimingMode::Pts).await;
        let stream = video_stream(10, 25, 25, 0);
        f.writer.ingest(Bytes::from(stream.clone())).await.unwrap();
        f.writer
            .ingest(Bytes::from_static(&[0x47, 0x01, 0x00]))
            .await
            .unwrap();
        f.writer.finalize().await.unwrap();

        let segments = drain(&mut f.segments);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].size, stream.len() as u64);
        assert_eq!(segments[0].size % PACKET_SIZE as u64, 0);
        assert_eq!(f.writer.stats.discarded_bytes, 3);
    }

    #[tokio::test]
    async fn test_wallclock_cuts_at_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.prepare("alpha").await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let mut writer = SegmentWriter::new(
            "alpha",
            Arc::new(storage),
            Duration::from_millis(20),
            TimingMode::Wallclock,
            tx,
        );

        writer.ingest(Bytes::from_static(b"aaaa")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        writer.ingest(Bytes::from_static(b"bbbb")).await.unwrap();
        writer.ingest(Bytes::from_static(b"cccc")).await.unwrap();
        writer.finalize().await.unwrap();

        let segments = drain(&mut rx);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].size, 8);
        assert!(segments[0].duration >= Duration::from_millis(20));
        assert_eq!(segments[1].size, 4);
        assert_eq!(
            std::fs::read(dir.path().join("alpha/seg-2.ts")).unwrap(),
            b"cccc"
        );
    }

    #[tokio::test]
    async fn test_run_consumes_channel() {
        let f = fixture(TimingMode::Pts).await;
        let mut segments = f.segments;
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(f.writer.run(rx));

        tx.send(WriterCommand::Data(Bytes::from(video_stream(100, 25, 25, 0))))
            .await
            .unwrap();
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WriterCommand::Restart(ack_tx)).await.unwrap();
        ack_rx.await.unwrap();
        // The restart committed the first segment before acknowledging.
        assert_eq!(segments.recv().await.unwrap().sequence, 1);

        drop(tx);
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.segments, 1);
        assert!(segments.recv().await.is_none());
    }
}
