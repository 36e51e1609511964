//! Keeps one transcode worker alive per session.
//!
//! A worker's stdout is drained into the segment writer. When the worker
//! dies, the writer is asked to commit its in-flight segment before a
//! replacement is launched, so two workers never write to the same session
//! at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::launcher::{LaunchedWorker, WorkerExit, WorkerLauncher};
use super::template::CommandTemplate;
use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventPayload};
use crate::ingest::InputSource;
use crate::segment::WriterCommand;

const READ_CHUNK: usize = 64 * 1024;

/// Why supervision ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Stop was requested.
    Stopped,
    /// The input ended and the last worker finished.
    Completed,
}

/// Observable state of the session's worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub pid: Option<u32>,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub consecutive_failures: u32,
    pub last_exit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEnd {
    InputEnded,
    WorkerClosed,
}

struct RunOutcome {
    exit: WorkerExit,
    input_ended: bool,
    stopped: bool,
}

type Feed<'a> = Pin<Box<dyn Future<Output = FeedEnd> + Send + 'a>>;

#[derive(Clone)]
pub struct TranscodeSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    stream: String,
    template: CommandTemplate,
    launcher: Arc<dyn WorkerLauncher>,
    config: SupervisorConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    snapshot: watch::Sender<WorkerSnapshot>,
}

impl TranscodeSupervisor {
    pub fn new(
        stream: impl Into<String>,
        template: CommandTemplate,
        launcher: Arc<dyn WorkerLauncher>,
        config: SupervisorConfig,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        let (snapshot, _) = watch::channel(WorkerSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                stream: stream.into(),
                template,
                launcher,
                config,
                events,
                cancel,
                snapshot,
            }),
        }
    }

    pub fn stream(&self) -> &str {
        &self.inner.stream
    }

    /// Subscribe to worker state changes.
    pub fn snapshot(&self) -> watch::Receiver<WorkerSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Request a graceful stop. Idempotent.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Spawn the supervision task.
    pub fn start(
        &self,
        input: InputSource,
        writer_tx: mpsc::Sender<WriterCommand>,
    ) -> JoinHandle<Result<SupervisorExit>> {
        let this = self.clone();
        tokio::spawn(async move { this.supervise(input, writer_tx).await })
    }

    /// Run workers until stop, end of input, or an exhausted restart budget.
    pub async fn supervise(
        &self,
        mut input: InputSource,
        writer_tx: mpsc::Sender<WriterCommand>,
    ) -> Result<SupervisorExit> {
        let stream = self.inner.stream.as_str();
        let config = &self.inner.config;
        let mut failures = 0u32;
        let mut restarts = 0u32;

        loop {
            if self.inner.cancel.is_cancelled() {
                return Ok(SupervisorExit::Stopped);
            }

            let invocation = self
                .inner
                .template
                .render(stream, input.binding())
                .map_err(|e| self.exhausted(failures, e.to_string()))?;
            let worker = self
                .inner
                .launcher
                .launch(&invocation)
                .await
                .map_err(|e| self.exhausted(failures, e.to_string()))?;

            let pid = worker.pid;
            let started = Instant::now();
            self.inner.snapshot.send_modify(|s| {
                s.pid = pid;
                s.running = true;
                s.started_at = Some(Utc::now());
                s.restarts = restarts;
            });
            self.inner.events.broadcast(EventPayload::WorkerStarted {
                stream: stream.to_string(),
                pid,
                restarts,
            });
            tracing::info!(stream, pid = ?pid, restarts, "Transcode worker started");

            let outcome = self.drive(worker, &mut input, &writer_tx).await?;
            let exit = outcome.exit;

            self.inner.snapshot.send_modify(|s| {
                s.pid = None;
                s.running = false;
                s.last_exit = Some(exit.to_string());
            });
            self.inner.events.broadcast(EventPayload::WorkerExited {
                stream: stream.to_string(),
                exit: exit.to_string(),
            });

            if outcome.stopped || self.inner.cancel.is_cancelled() {
                tracing::info!(stream, pid = ?pid, %exit, "Transcode worker stopped");
                return Ok(SupervisorExit::Stopped);
            }

            let completed = match &input {
                InputSource::Stream(_) => outcome.input_ended,
                InputSource::Locator(_) => exit.success,
            };
            if completed {
                tracing::info!(stream, pid = ?pid, %exit, "Input ended, transcode complete");
                return Ok(SupervisorExit::Completed);
            }

            if started.elapsed() >= config.healthy_reset() {
                failures = 0;
            }
            failures += 1;
            self.inner
                .snapshot
                .send_modify(|s| s.consecutive_failures = failures);

            let crash = Error::WorkerCrash {
                stream: stream.to_string(),
                message: exit.to_string(),
            };
            tracing::warn!(stream, pid = ?pid, attempt = failures, "{}", crash);

            if failures >= config.max_restart_attempts {
                return Err(self.exhausted(failures, exit.to_string()));
            }

            // Old worker is fully drained; wait for the writer to commit.
            let (ack_tx, ack_rx) = oneshot::channel();
            writer_tx
                .send(WriterCommand::Restart(ack_tx))
                .await
                .map_err(|_| self.writer_gone())?;
            ack_rx.await.map_err(|_| self.writer_gone())?;

            let backoff = config.backoff(failures);
            self.inner.events.broadcast(EventPayload::WorkerRestarted {
                stream: stream.to_string(),
                attempt: failures,
                backoff_ms: backoff.as_millis() as u64,
            });
            tracing::info!(stream, attempt = failures, backoff = ?backoff, "Restarting transcode worker");

            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Ok(SupervisorExit::Stopped),
                _ = tokio::time::sleep(backoff) => {}
            }
            restarts += 1;
        }
    }

    /// Pump input into and output out of one worker until its stdout closes.
    async fn drive(
        &self,
        worker: LaunchedWorker,
        input: &mut InputSource,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) -> Result<RunOutcome> {
        let LaunchedWorker {
            pid,
            stdin,
            mut stdout,
            mut process,
        } = worker;
        let stream = self.inner.stream.as_str();
        let grace_period = self.inner.config.shutdown_grace();

        let piped = stdin.is_some();
        let mut feed: Option<Feed<'_>> = match (stdin, input) {
            (Some(stdin), InputSource::Stream(rx)) => Some(Box::pin(feed_stdin(stdin, rx))),
            _ => None,
        };
        let mut grace: Option<Pin<Box<tokio::time::Sleep>>> = None;
        let mut input_ended = false;
        let mut stopped = false;
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        loop {
            tokio::select! {
                biased;

                _ = self.inner.cancel.cancelled(), if !stopped => {
                    stopped = true;
                    if piped {
                        // Closing stdin lets the worker flush and exit.
                        feed = None;
                    } else if let Err(e) = process.kill().await {
                        tracing::warn!(stream, pid = ?pid, "Failed to kill worker: {}", e);
                    }
                    grace = Some(Box::pin(tokio::time::sleep(grace_period)));
                }
                _ = maybe(&mut grace) => {
                    tracing::warn!(stream, pid = ?pid, "Worker did not exit within grace period, killing");
                    if let Err(e) = process.kill().await {
                        tracing::warn!(stream, pid = ?pid, "Failed to kill worker: {}", e);
                    }
                    break;
                }
                end = maybe(&mut feed) => {
                    feed = None;
                    if end == FeedEnd::InputEnded {
                        tracing::debug!(stream, "Input stream ended");
                        input_ended = true;
                    }
                }
                read = stdout.read_buf(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let chunk: Bytes = buf.split().freeze();
                        if writer_tx.send(WriterCommand::Data(chunk)).await.is_err() {
                            let _ = process.kill().await;
                            return Err(self.writer_gone());
                        }
                        buf.reserve(READ_CHUNK);
                    }
                    Err(e) => {
                        tracing::warn!(stream, pid = ?pid, "Worker stdout failed: {}", e);
                        break;
                    }
                },
            }
        }

        drop(feed);

        let exit = match tokio::time::timeout(grace_period, process.wait()).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                tracing::warn!(stream, pid = ?pid, "Failed to collect worker exit: {}", e);
                WorkerExit::signaled()
            }
            Err(_) => {
                tracing::warn!(stream, pid = ?pid, "Worker closed stdout but kept running, killing");
                let _ = process.kill().await;
                process.wait().await.unwrap_or_else(|_| WorkerExit::signaled())
            }
        };

        Ok(RunOutcome {
            exit,
            input_ended,
            stopped,
        })
    }

    fn exhausted(&self, attempts: u32, message: String) -> Error {
        Error::WorkerExhausted {
            stream: self.inner.stream.clone(),
            attempts,
            message,
        }
    }

    fn writer_gone(&self) -> Error {
        Error::Internal(format!("segment writer for {} is gone", self.inner.stream))
    }
}

/// Copy pushed input into the worker's stdin. Dropping the future closes
/// stdin.
async fn feed_stdin(
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    rx: &mut mpsc::Receiver<Bytes>,
) -> FeedEnd {
    loop {
        match rx.recv().await {
            Some(bytes) => {
                if stdin.write_all(&bytes).await.is_err() {
                    return FeedEnd::WorkerClosed;
                }
            }
            None => {
                let _ = stdin.shutdown().await;
                return FeedEnd::InputEnded;
            }
        }
    }
}

/// Await an optional future; pending forever when absent.
async fn maybe<F: Future + Unpin>(fut: &mut Option<F>) -> F::Output {
    match fut {
        Some(f) => f.await,
        None => std::future::pending().await,
    }
}
