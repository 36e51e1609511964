//! Turns publish start/stop notifications into running pipelines.
//!
//! Each session runs three stages connected by bounded channels:
//! supervisor (worker stdout) -> segment writer -> playlist manager.
//! A per-session task waits for all of them and finalizes the session
//! exactly once, whichever way it ended.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::InputSource;
use crate::config::{Config, RelayConfig, SupervisorConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventPayload};
use crate::playlist::{PlaylistManager, Retention};
use crate::relay::{Session, SessionRegistry, SessionState, SessionSummary};
use crate::segment::{SegmentStorage, SegmentWriter, WriterStats};
use crate::transcode::{CommandTemplate, SupervisorExit, TranscodeSupervisor, WorkerLauncher};

#[derive(Clone)]
pub struct IngestServer {
    inner: Arc<Inner>,
}

struct Inner {
    relay: RelayConfig,
    supervisor: SupervisorConfig,
    template: CommandTemplate,
    registry: SessionRegistry,
    storage: Arc<dyn SegmentStorage>,
    launcher: Arc<dyn WorkerLauncher>,
    events: Arc<EventBus>,
    /// Summary of the last terminated session per name.
    finished: DashMap<String, SessionSummary>,
}

impl IngestServer {
    pub fn new(
        config: &Config,
        storage: Arc<dyn SegmentStorage>,
        launcher: Arc<dyn WorkerLauncher>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let template = CommandTemplate::from_config(&config.transcode)?;
        Ok(Self {
            inner: Arc::new(Inner {
                relay: config.relay.clone(),
                supervisor: config.supervisor.clone(),
                template,
                registry: SessionRegistry::new(events.clone()),
                storage,
                launcher,
                events,
                finished: DashMap::new(),
            }),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn storage(&self) -> &Arc<dyn SegmentStorage> {
        &self.inner.storage
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn relay_config(&self) -> &RelayConfig {
        &self.inner.relay
    }

    fn retention(&self) -> Retention {
        match self.inner.relay.max_segments {
            Some(max) => Retention::Count(max),
            None => Retention::Duration(self.inner.relay.window_duration()),
        }
    }

    /// A producer started publishing `name`.
    pub async fn on_publish_start(&self, name: &str, input: InputSource) -> Result<SessionSummary> {
        let inner = &self.inner;
        let segment_duration = inner.relay.segment_duration();

        let session = inner.registry.create(name, || {
            let playlist = PlaylistManager::new(
                name,
                inner.storage.clone(),
                self.retention(),
                segment_duration,
                inner.events.clone(),
            );
            Session::new(name, Arc::new(playlist))
        })?;
        inner.finished.remove(name);

        // Until the session task owns it, dropping this future must not
        // leave the name registered.
        let guard = StartGuard {
            server: self,
            session: &session,
            armed: true,
        };

        if let Err(e) = inner.storage.prepare(name).await {
            let err = Error::write(name, e);
            session.record_error(&err);
            return Err(err);
        }

        let capacity = inner.relay.channel_capacity;
        let (writer_tx, writer_rx) = mpsc::channel(capacity);
        let (segments_tx, segments_rx) = mpsc::channel(capacity);

        let supervisor = TranscodeSupervisor::new(
            name,
            inner.template.clone(),
            inner.launcher.clone(),
            inner.supervisor.clone(),
            inner.events.clone(),
            session.cancel_token().clone(),
        );
        session.attach_worker(supervisor.snapshot());

        let writer = SegmentWriter::new(
            name,
            inner.storage.clone(),
            segment_duration,
            inner.relay.timing,
            segments_tx,
        );

        tracing::info!(
            stream = %name,
            session_id = %session.id(),
            input = input.kind(),
            "Publish started"
        );

        let stages = Stages {
            supervisor: supervisor.start(input, writer_tx),
            writer: tokio::spawn(writer.run(writer_rx)),
            playlist: {
                let playlist = session.playlist().clone();
                tokio::spawn(async move { playlist.run(segments_rx).await })
            },
        };

        if session.advance(SessionState::Starting, SessionState::Live) {
            self.state_changed(&session, SessionState::Live);
        }
        tokio::spawn(run_session(self.clone(), session.clone(), stages));
        guard.disarm();

        Ok(session.summary())
    }

    /// The producer stopped publishing `name`. Idempotent.
    pub async fn on_publish_stop(&self, name: &str) -> Result<()> {
        let Ok(session) = self.inner.registry.lookup(name) else {
            tracing::debug!(stream = %name, "Stop for stream that is not live");
            return Ok(());
        };

        tracing::info!(stream = %name, session_id = %session.id(), "Publish stopped");
        self.transition(&session, SessionState::Stopping);
        session.cancel_token().cancel();
        let state = session.terminated().await;
        tracing::debug!(stream = %name, %state, "Session terminated");
        Ok(())
    }

    /// Status of the live session, or of the last one that ended.
    pub fn status(&self, name: &str) -> Result<SessionSummary> {
        if let Ok(session) = self.inner.registry.lookup(name) {
            return Ok(session.summary());
        }
        self.inner
            .finished
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("stream", name))
    }

    /// Summaries of all live sessions.
    pub fn list(&self) -> Vec<SessionSummary> {
        self.inner
            .registry
            .list()
            .iter()
            .map(|session| session.summary())
            .collect()
    }

    /// Stop every live session and wait for them to finish.
    pub async fn shutdown(&self) {
        let sessions = self.inner.registry.list();
        if sessions.is_empty() {
            return;
        }
        tracing::info!(count = sessions.len(), "Stopping live sessions");
        for session in &sessions {
            self.transition(session, SessionState::Stopping);
            session.cancel_token().cancel();
        }
        futures::future::join_all(sessions.iter().map(|session| session.terminated())).await;
    }

    fn transition(&self, session: &Session, state: SessionState) {
        if session.set_state(state) {
            self.state_changed(session, state);
        }
    }

    fn state_changed(&self, session: &Session, state: SessionState) {
        self.inner.events.broadcast(EventPayload::SessionStateChanged {
            stream: session.name().to_string(),
            session_id: session.id(),
            state: state.to_string(),
        });
    }
}

/// Fails and unregisters a session whose start did not complete.
struct StartGuard<'a> {
    server: &'a IngestServer,
    session: &'a Arc<Session>,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = self.session;
        let inner = &self.server.inner;
        tracing::warn!(stream = %session.name(), session_id = %session.id(), "Publish start abandoned");

        if session.summary().last_error.is_none() {
            session.record_error("publish start abandoned");
        }
        session.cancel_token().cancel();
        session.mark_ended_at();

        let mut summary = session.summary();
        summary.state = SessionState::Failed;
        inner.finished.insert(session.name().to_string(), summary);
        inner.registry.remove_session(session);
        self.server.transition(session, SessionState::Failed);
    }
}

struct Stages {
    supervisor: JoinHandle<Result<SupervisorExit>>,
    writer: JoinHandle<Result<WriterStats>>,
    playlist: JoinHandle<Result<()>>,
}

/// Await a pipeline stage; a failure stops the rest of the session.
async fn stage<T>(handle: JoinHandle<Result<T>>, cancel: &CancellationToken) -> Result<T> {
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("pipeline task failed: {}", e))),
    };
    if result.is_err() {
        cancel.cancel();
    }
    result
}

async fn run_session(server: IngestServer, session: Arc<Session>, stages: Stages) {
    let name = session.name().to_string();
    let cancel = session.cancel_token().clone();

    let (supervisor, writer, playlist) = tokio::join!(
        stage(stages.supervisor, &cancel),
        stage(stages.writer, &cancel),
        stage(stages.playlist, &cancel),
    );

    if let Ok(stats) = &writer {
        tracing::debug!(
            stream = %name,
            segments = stats.segments,
            bytes = stats.bytes,
            discarded = stats.discarded_bytes,
            "Pipeline drained"
        );
    }
    let reason = match &supervisor {
        Ok(SupervisorExit::Completed) => "input ended",
        _ => "stopped",
    };

    // The stage closest to storage holds the root cause.
    let mut error = playlist.err().or(writer.err()).or(supervisor.err());

    if let Err(e) = session.playlist().finish().await {
        tracing::error!(stream = %name, "Failed to write final playlist: {}", e);
        if error.is_none() {
            error = Some(e);
        }
    }

    let terminal = match &error {
        None => SessionState::Ended,
        Some(_) => SessionState::Failed,
    };
    if let Some(e) = &error {
        tracing::error!(stream = %name, session_id = %session.id(), "Session failed: {}", e);
        session.record_error(e);
        server.inner.events.broadcast(EventPayload::SessionFailed {
            stream: name.clone(),
            session_id: session.id(),
            error: e.to_string(),
        });
    } else {
        tracing::info!(stream = %name, session_id = %session.id(), reason, "Session ended");
    }
    session.mark_ended_at();

    let mut summary = session.summary();
    summary.state = terminal;
    server.inner.finished.insert(name, summary);
    server.inner.registry.remove_session(&session);

    server.transition(&session, terminal);
}
