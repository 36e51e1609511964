//! A single live publish.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::playlist::PlaylistManager;
use crate::transcode::WorkerSnapshot;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Live,
    Stopping,
    Ended,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status snapshot of a session, current or terminated.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub worker: WorkerSnapshot,
    /// Sequence of the newest committed segment, 0 before the first.
    pub last_sequence: u64,
    pub media_sequence: u64,
    pub playlist_length: usize,
    pub last_error: Option<String>,
}

/// One live publish. Owned by the registry.
pub struct Session {
    name: String,
    id: Uuid,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    worker: RwLock<Option<watch::Receiver<WorkerSnapshot>>>,
    playlist: Arc<PlaylistManager>,
    cancel: CancellationToken,
    last_error: RwLock<Option<String>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(name: impl Into<String>, playlist: Arc<PlaylistManager>) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state,
            worker: RwLock::new(None),
            playlist,
            cancel: CancellationToken::new(),
            last_error: RwLock::new(None),
            ended_at: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next`. Terminal states are final; returns whether the state
    /// changed.
    pub fn set_state(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Move to `next` only if the session is still in `from`.
    pub fn advance(&self, from: SessionState, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from || from == next {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Wait until the session reaches a terminal state.
    pub async fn terminated(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    pub fn playlist(&self) -> &Arc<PlaylistManager> {
        &self.playlist
    }

    /// Token cancelled when the session is asked to stop.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn attach_worker(&self, worker: watch::Receiver<WorkerSnapshot>) {
        *self.worker.write() = Some(worker);
    }

    pub fn record_error(&self, error: impl fmt::Display) {
        *self.last_error.write() = Some(error.to_string());
    }

    pub fn mark_ended_at(&self) {
        *self.ended_at.write() = Some(Utc::now());
    }

    pub fn summary(&self) -> SessionSummary {
        let worker = self
            .worker
            .read()
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default();
        let playlist = self.playlist.current_playlist();
        SessionSummary {
            name: self.name.clone(),
            id: self.id,
            state: self.state(),
            created_at: self.created_at,
            ended_at: *self.ended_at.read(),
            worker,
            last_sequence: playlist.last_sequence().unwrap_or(0),
            media_sequence: playlist.media_sequence,
            playlist_length: playlist.segments.len(),
            last_error: self.last_error.read().clone(),
        }
    }
}
