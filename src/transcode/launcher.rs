//! Spawning transcode workers.
//!
//! [`WorkerLauncher`] is the seam between the supervisor and the operating
//! system: [`ProcessLauncher`] runs real processes through `tokio::process`,
//! tests substitute in-memory workers.

use std::fmt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use super::Invocation;
use crate::error::{Error, Result};

/// How a worker terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            success: code == 0,
        }
    }

    pub fn signaled() -> Self {
        Self {
            code: None,
            success: false,
        }
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Handle to a running worker.
#[async_trait]
pub trait WorkerProcess: Send {
    /// Wait for the worker to exit.
    async fn wait(&mut self) -> std::io::Result<WorkerExit>;

    /// Forcefully terminate the worker.
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// A freshly launched worker with its pipes.
pub struct LaunchedWorker {
    pub pid: Option<u32>,
    /// Present when the invocation pipes the stream to stdin.
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn WorkerProcess>,
}

impl fmt::Debug for LaunchedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedWorker")
            .field("pid", &self.pid)
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, invocation: &Invocation) -> Result<LaunchedWorker>;
}

/// Launches workers as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<LaunchedWorker> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin_piped {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::InvalidCommand(format!("failed to spawn {}: {}", invocation.program, e))
        })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("worker stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncWrite + Send + Unpin>);

        if let Some(stderr) = child.stderr.take() {
            let stream = invocation.stream.clone();
            tokio::spawn(async move {
                drain_stderr(stderr, &stream, pid).await;
            });
        }

        tracing::debug!(
            stream = %invocation.stream,
            pid = ?pid,
            "Spawned worker: {}",
            invocation
        );

        Ok(LaunchedWorker {
            pid,
            stdin,
            stdout: Box::new(stdout),
            process: Box::new(ChildProcess(child)),
        })
    }
}

/// Log worker diagnostics until the pipe closes. Returns the line count.
///
/// Lines need not be UTF-8; the pipe is read to the end regardless so the
/// worker never blocks on a full stderr.
async fn drain_stderr(stderr: impl AsyncRead + Unpin, stream: &str, pid: Option<u32>) -> usize {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut lines = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                lines += 1;
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(stream = %stream, pid = ?pid, "worker: {}", line.trim_end());
            }
            Err(e) => {
                tracing::debug!(stream = %stream, pid = ?pid, "Worker stderr closed: {}", e);
                break;
            }
        }
    }
    lines
}

struct ChildProcess(Child);

#[async_trait]
impl WorkerProcess for ChildProcess {
    async fn wait(&mut self) -> std::io::Result<WorkerExit> {
        self.0.wait().await.map(WorkerExit::from)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill().await
    }
}
