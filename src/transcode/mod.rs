//! Transcode workers and their supervision.

mod launcher;
mod supervisor;
mod template;

pub use launcher::{LaunchedWorker, ProcessLauncher, WorkerExit, WorkerLauncher, WorkerProcess};
pub use supervisor::{SupervisorExit, TranscodeSupervisor, WorkerSnapshot};
pub use template::{CommandTemplate, Invocation, PLACEHOLDERS};
