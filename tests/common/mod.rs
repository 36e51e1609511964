//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an [`IngestServer`] to a temporary
//! storage directory and a [`FakeLauncher`] whose workers are in-memory
//! pipes. The [`with_server`](TestHarness::with_server) constructor also
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use liveforged::config::Config;
use liveforged::events::EventBus;
use liveforged::ingest::IngestServer;
use liveforged::relay::{SessionState, SessionSummary};
use liveforged::segment::{FsStorage, SegmentSink, SegmentStorage};
use liveforged::server::{create_router, AppContext};
use liveforged::transcode::{Invocation, LaunchedWorker, WorkerExit, WorkerLauncher, WorkerProcess};

pub use liveforged_media::ts::testing::video_stream;

/// `seconds` of 25 fps video with a keyframe every second.
pub fn video_secs(seconds: usize, start_pts: u64) -> Vec<u8> {
    video_stream(seconds * 25, 25, 25, start_pts)
}

/// What a fake worker does once launched.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write the bytes to stdout, then exit.
    Emit(Vec<u8>, WorkerExit),
    /// Copy stdin to stdout; exit 0 when stdin closes.
    Echo,
    /// Write the bytes, then run until killed.
    Hang(Vec<u8>),
}

/// Launches scripted in-memory workers in order, then `fallback` forever.
pub struct FakeLauncher {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Option<Script>,
    invocations: Mutex<Vec<Invocation>>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Self::with_fallback(scripts, None)
    }

    pub fn with_fallback(scripts: Vec<Script>, fallback: Option<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            invocations: Mutex::new(Vec::new()),
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }
}

struct FakeProcess {
    exit: Option<oneshot::Receiver<WorkerExit>>,
    kill: CancellationToken,
    status: Option<WorkerExit>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    async fn wait(&mut self) -> io::Result<WorkerExit> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = match self.exit.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| WorkerExit::signaled()),
            None => WorkerExit::signaled(),
        };
        self.status = Some(status);
        Ok(status)
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.kill.cancel();
        Ok(())
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, invocation: &Invocation) -> liveforged::Result<LaunchedWorker> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().push(invocation.clone());

        let script = self
            .scripts
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                liveforged::Error::InvalidCommand("no scripted worker left".into())
            })?;

        let (mut out_w, out_r) = duplex(256 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let killed = kill.clone();
        let mut stdin: Option<Box<dyn AsyncWrite + Send + Unpin>> = None;

        match script {
            Script::Emit(bytes, exit) => {
                tokio::spawn(async move {
                    let exit = tokio::select! {
                        _ = out_w.write_all(&bytes) => exit,
                        _ = killed.cancelled() => WorkerExit::signaled(),
                    };
                    drop(out_w);
                    let _ = exit_tx.send(exit);
                });
            }
            Script::Echo => {
                let (in_w, mut in_r) = duplex(256 * 1024);
                if invocation.stdin_piped {
                    stdin = Some(Box::new(in_w));
                }
                tokio::spawn(async move {
                    let exit = tokio::select! {
                        _ = tokio::io::copy(&mut in_r, &mut out_w) => WorkerExit::code(0),
                        _ = killed.cancelled() => WorkerExit::signaled(),
                    };
                    drop(out_w);
                    let _ = exit_tx.send(exit);
                });
            }
            Script::Hang(bytes) => {
                tokio::spawn(async move {
                    let _ = out_w.write_all(&bytes).await;
                    killed.cancelled().await;
                    drop(out_w);
                    let _ = exit_tx.send(WorkerExit::signaled());
                });
            }
        }

        Ok(LaunchedWorker {
            pid: Some(10_000 + self.launches() as u32),
            stdin,
            stdout: Box::new(out_r),
            process: Box::new(FakeProcess {
                exit: Some(exit_rx),
                kill,
                status: None,
            }),
        })
    }
}

/// Filesystem storage that fails to create segments from a given sequence
/// on, and can hold the first `prepare` until released.
pub struct FailingStorage {
    inner: FsStorage,
    fail_from: u64,
    stall_prepare: AtomicBool,
    release: Notify,
}

impl FailingStorage {
    pub fn new(base: &Path, fail_from: u64) -> Self {
        Self {
            inner: FsStorage::new(base),
            fail_from,
            stall_prepare: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    /// Never fails writes; the first `prepare` waits for [`release`](Self::release).
    pub fn stalling(base: &Path) -> Self {
        Self {
            inner: FsStorage::new(base),
            fail_from: u64::MAX,
            stall_prepare: AtomicBool::new(true),
            release: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl SegmentStorage for FailingStorage {
    async fn prepare(&self, stream: &str) -> io::Result<()> {
        if self.stall_prepare.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.inner.prepare(stream).await
    }

    async fn create_segment(
        &self,
        stream: &str,
        sequence: u64,
    ) -> io::Result<Box<dyn SegmentSink>> {
        if sequence >= self.fail_from {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.create_segment(stream, sequence).await
    }

    async fn delete_segment(&self, stream: &str, sequence: u64) -> io::Result<()> {
        self.inner.delete_segment(stream, sequence).await
    }

    async fn write_playlist(&self, stream: &str, contents: &str) -> io::Result<()> {
        self.inner.write_playlist(stream, contents).await
    }

    async fn open(
        &self,
        stream: &str,
        name: &str,
    ) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.inner.open(stream, name).await
    }
}

/// Relay config tuned for fast tests.
pub fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.relay.base_path = base.to_path_buf();
    config.supervisor.restart_backoff_base_ms = 1;
    config.supervisor.restart_backoff_max_ms = 5;
    config.supervisor.shutdown_grace_secs = 1;
    config
}

enum Fault {
    FailSegmentsFrom(u64),
    StallPrepare,
}

pub struct TestHarness {
    pub dir: tempfile::TempDir,
    pub ingest: IngestServer,
    pub launcher: Arc<FakeLauncher>,
    pub events: Arc<EventBus>,
    pub config: Config,
    stalled: Option<Arc<FailingStorage>>,
}

impl TestHarness {
    pub fn new(launcher: Arc<FakeLauncher>) -> Self {
        Self::build(launcher, |_| {}, None)
    }

    /// Harness whose storage stalls the first publish in `prepare`.
    pub fn with_stalled_prepare(launcher: Arc<FakeLauncher>) -> Self {
        Self::build(launcher, |_| {}, Some(Fault::StallPrepare))
    }

    pub fn with_config(launcher: Arc<FakeLauncher>, tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build(launcher, tweak, None)
    }

    pub fn with_failing_storage(launcher: Arc<FakeLauncher>, fail_from: u64) -> Self {
        Self::build(launcher, |_| {}, Some(Fault::FailSegmentsFrom(fail_from)))
    }

    fn build(
        launcher: Arc<FakeLauncher>,
        tweak: impl FnOnce(&mut Config),
        fault: Option<Fault>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let mut stalled = None;
        let storage: Arc<dyn SegmentStorage> = match fault {
            Some(Fault::FailSegmentsFrom(n)) => Arc::new(FailingStorage::new(dir.path(), n)),
            Some(Fault::StallPrepare) => {
                let stalling = Arc::new(FailingStorage::stalling(dir.path()));
                stalled = Some(stalling.clone());
                stalling
            }
            None => Arc::new(FsStorage::new(dir.path())),
        };
        let events = Arc::new(EventBus::default());
        let ingest = IngestServer::new(&config, storage, launcher.clone(), events.clone())
            .expect("failed to build ingest server");

        Self {
            dir,
            ingest,
            launcher,
            events,
            config,
            stalled,
        }
    }

    /// Let a stalled `prepare` complete.
    pub fn release_prepare(&self) {
        if let Some(storage) = &self.stalled {
            storage.release();
        }
    }

    /// Create a harness and start the HTTP server on a random port.
    pub async fn with_server(launcher: Arc<FakeLauncher>) -> (Self, SocketAddr) {
        let harness = Self::new(launcher);
        let addr = harness.serve().await;
        (harness, addr)
    }

    /// Start an Axum server on a random port.
    pub async fn serve(&self) -> SocketAddr {
        let ctx = AppContext::new(self.config.clone(), self.ingest.clone());
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }

    pub fn stream_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn playlist_text(&self, name: &str) -> String {
        std::fs::read_to_string(self.stream_dir(name).join("playlist.m3u8"))
            .expect("playlist missing")
    }

    /// Poll until the stream's session has terminated.
    pub async fn wait_terminated(&self, name: &str) -> SessionSummary {
        self.wait_for(name, |s| {
            matches!(s.state, SessionState::Ended | SessionState::Failed)
        })
        .await
    }

    pub async fn wait_for(
        &self,
        name: &str,
        condition: impl Fn(&SessionSummary) -> bool,
    ) -> SessionSummary {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Ok(summary) = self.ingest.status(name) {
                if condition(&summary) {
                    return summary;
                }
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting on {}: {:?}",
                    name,
                    self.ingest.status(name).map(|s| s.state)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
