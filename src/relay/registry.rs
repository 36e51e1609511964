//! Registry of live sessions keyed by stream name.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::Session;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventPayload};

pub const MAX_STREAM_NAME_LEN: usize = 128;

/// Stream names become directory names, so only a conservative character
/// set is accepted.
pub fn validate_stream_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_STREAM_NAME_LEN {
        return Err(Error::Validation(format!(
            "stream name must be 1-{} characters",
            MAX_STREAM_NAME_LEN
        )));
    }
    if name.starts_with('.') {
        return Err(Error::Validation(format!(
            "stream name must not start with '.': {}",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::Validation(format!(
            "invalid character {:?} in stream name {}",
            c, name
        )));
    }
    Ok(())
}

/// Thread-safe map of live sessions. At most one per name.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    events: Arc<EventBus>,
}

impl SessionRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Register a session built by `make` unless the name is taken.
    ///
    /// The check and the insert happen under the same shard lock, so of two
    /// concurrent creates for one name exactly one succeeds.
    pub fn create<F>(&self, name: &str, make: F) -> Result<Arc<Session>>
    where
        F: FnOnce() -> Session,
    {
        validate_stream_name(name)?;

        let session = match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(Error::duplicate(name)),
            Entry::Vacant(slot) => {
                let session = Arc::new(make());
                slot.insert(session.clone());
                session
            }
        };

        tracing::info!(stream = %name, session_id = %session.id(), "Registered session");
        self.events.broadcast(EventPayload::SessionCreated {
            stream: name.to_string(),
            session_id: session.id(),
        });
        Ok(session)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Session>> {
        self.sessions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("session", name))
    }

    /// Remove whatever session is registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(name).map(|(_, session)| session);
        if let Some(session) = &removed {
            self.removed(session);
        }
        removed
    }

    /// Remove `session` only if it is still the one registered under its
    /// name.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.name(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            self.removed(session);
        }
        removed
    }

    fn removed(&self, session: &Session) {
        tracing::info!(
            stream = %session.name(),
            session_id = %session.id(),
            duration_secs = (chrono::Utc::now() - session.created_at()).num_seconds(),
            "Removed session"
        );
        self.events.broadcast(EventPayload::SessionRemoved {
            stream: session.name().to_string(),
            session_id: session.id(),
        });
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
