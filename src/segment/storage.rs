//! Where segments and playlists are kept.
//!
//! Layout: `{base}/{stream}/seg-{n}.ts` and `{base}/{stream}/playlist.m3u8`.
//! Segments are written as `seg-{n}.ts.part` and renamed on commit, so a
//! reader never observes a partial segment.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

use super::segment_file_name;

pub const PLAYLIST_FILE: &str = "playlist.m3u8";
const PART_SUFFIX: &str = ".part";
const TMP_SUFFIX: &str = ".tmp";

/// A segment being written.
#[async_trait]
pub trait SegmentSink: Send {
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Make the segment durable and visible under its final name.
    async fn commit(self: Box<Self>) -> io::Result<()>;

    /// Discard the segment.
    async fn abort(self: Box<Self>);
}

#[async_trait]
pub trait SegmentStorage: Send + Sync {
    /// Create the stream directory, clearing output of a previous publish.
    async fn prepare(&self, stream: &str) -> io::Result<()>;

    async fn create_segment(&self, stream: &str, sequence: u64)
        -> io::Result<Box<dyn SegmentSink>>;

    async fn delete_segment(&self, stream: &str, sequence: u64) -> io::Result<()>;

    /// Atomically replace the stream's playlist.
    async fn write_playlist(&self, stream: &str, contents: &str) -> io::Result<()>;

    /// Open a committed file (segment or playlist) for reading.
    async fn open(&self, stream: &str, name: &str)
        -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Local filesystem storage.
#[derive(Debug, Clone)]
pub struct FsStorage {
    base: PathBuf,
}

impl FsStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn stream_dir(&self, stream: &str) -> PathBuf {
        self.base.join(stream)
    }
}

fn is_relay_output(name: &str) -> bool {
    let name = name
        .strip_suffix(PART_SUFFIX)
        .or_else(|| name.strip_suffix(TMP_SUFFIX))
        .unwrap_or(name);
    name == PLAYLIST_FILE || super::parse_segment_file_name(name).is_some()
}

#[async_trait]
impl SegmentStorage for FsStorage {
    async fn prepare(&self, stream: &str) -> io::Result<()> {
        let dir = self.stream_dir(stream);
        fs::create_dir_all(&dir).await?;

        let mut entries = fs::read_dir(&dir).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if is_relay_output(&name.to_string_lossy()) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(stream, removed, "Cleared previous stream output");
        }
        Ok(())
    }

    async fn create_segment(
        &self,
        stream: &str,
        sequence: u64,
    ) -> io::Result<Box<dyn SegmentSink>> {
        let final_path = self.stream_dir(stream).join(segment_file_name(sequence));
        let part_path = part_path(&final_path, PART_SUFFIX);
        let file = fs::File::create(&part_path).await?;
        Ok(Box::new(FsSink {
            file: BufWriter::new(file),
            part_path,
            final_path,
        }))
    }

    async fn delete_segment(&self, stream: &str, sequence: u64) -> io::Result<()> {
        let path = self.stream_dir(stream).join(segment_file_name(sequence));
        match fs::remove_file(&path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn write_playlist(&self, stream: &str, contents: &str) -> io::Result<()> {
        let final_path = self.stream_dir(stream).join(PLAYLIST_FILE);
        let tmp_path = part_path(&final_path, TMP_SUFFIX);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await
    }

    async fn open(
        &self,
        stream: &str,
        name: &str,
    ) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = fs::File::open(self.stream_dir(stream).join(name)).await?;
        Ok(Box::new(file))
    }
}

fn part_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

struct FsSink {
    file: BufWriter<fs::File>,
    part_path: PathBuf,
    final_path: PathBuf,
}

impl FsSink {
    async fn persist(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        fs::rename(&self.part_path, &self.final_path).await
    }
}

#[async_trait]
impl SegmentSink for FsSink {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn commit(mut self: Box<Self>) -> io::Result<()> {
        let result = self.persist().await;
        if result.is_err() {
            self.abort().await;
        }
        result
    }

    async fn abort(self: Box<Self>) {
        let FsSink { file, part_path, .. } = *self;
        drop(file);
        if let Err(e) = fs::remove_file(&part_path).await {
            tracing::warn!("Failed to remove partial segment {:?}: {}", part_path, e);
        }
    }
}
