use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// How the segment writer measures elapsed time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Presentation timestamps read from the MPEG-TS output.
    #[default]
    Pts,
    /// Wall time since the segment's first byte.
    Wallclock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Target duration of each segment, in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: f64,

    /// Total duration of segments kept in the playlist, in seconds.
    #[serde(default = "default_window_duration")]
    pub window_duration_secs: f64,

    /// Keep a fixed number of segments instead of a duration window.
    #[serde(default)]
    pub max_segments: Option<usize>,

    /// Directory under which each stream gets its own segment directory.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Capacity of the bounded channels between pipeline stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub timing: TimingMode,
}

fn default_segment_duration() -> f64 {
    4.0
}
fn default_window_duration() -> f64 {
    20.0
}
fn default_base_path() -> PathBuf {
    PathBuf::from("./hls")
}
fn default_channel_capacity() -> usize {
    32
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: default_segment_duration(),
            window_duration_secs: default_window_duration(),
            max_segments: None,
            base_path: default_base_path(),
            channel_capacity: default_channel_capacity(),
            timing: TimingMode::default(),
        }
    }
}

impl RelayConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs_f64(self.segment_duration_secs)
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs_f64(self.window_duration_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Consecutive crashes tolerated before the session is failed.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub restart_backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub restart_backoff_max_ms: u64,

    /// A worker that ran at least this long resets the failure counter.
    #[serde(default = "default_healthy_reset")]
    pub healthy_reset_secs: u64,

    /// Time a stopping worker gets to flush its output before being killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_max_restart_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    10_000
}
fn default_healthy_reset() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: default_max_restart_attempts(),
            restart_backoff_base_ms: default_backoff_base(),
            restart_backoff_max_ms: default_backoff_max(),
            healthy_reset_secs: default_healthy_reset(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl SupervisorConfig {
    /// Delay before relaunching after the `failures`-th consecutive crash.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let ms = self
            .restart_backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.restart_backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn healthy_reset(&self) -> Duration {
        Duration::from_secs(self.healthy_reset_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Program to run for each worker.
    #[serde(default = "default_program")]
    pub program: String,

    /// Argument template. `{name}`, `{input}` and `{output}` are substituted.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        "{input}",
        "-c:v",
        "libx264",
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-force_key_frames",
        "expr:gte(t,n_forced*2)",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-f",
        "mpegts",
        "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}
