//! Relay lifecycle events.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Session lifecycle ---------------------------------------------------
    SessionCreated {
        stream: String,
        session_id: Uuid,
    },
    SessionStateChanged {
        stream: String,
        session_id: Uuid,
        state: String,
    },
    SessionRemoved {
        stream: String,
        session_id: Uuid,
    },
    SessionFailed {
        stream: String,
        session_id: Uuid,
        error: String,
    },

    // -- Segments ------------------------------------------------------------
    SegmentCompleted {
        stream: String,
        sequence: u64,
        duration_secs: f64,
        size: u64,
    },
    SegmentsEvicted {
        stream: String,
        sequences: Vec<u64>,
    },

    // -- Workers -------------------------------------------------------------
    WorkerStarted {
        stream: String,
        pid: Option<u32>,
        restarts: u32,
    },
    WorkerExited {
        stream: String,
        exit: String,
    },
    WorkerRestarted {
        stream: String,
        attempt: u32,
        backoff_ms: u64,
    },
}

impl EventPayload {
    /// Stream name the event relates to.
    pub fn stream(&self) -> &str {
        match self {
            EventPayload::SessionCreated { stream, .. }
            | EventPayload::SessionStateChanged { stream, .. }
            | EventPayload::SessionRemoved { stream, .. }
            | EventPayload::SessionFailed { stream, .. }
            | EventPayload::SegmentCompleted { stream, .. }
            | EventPayload::SegmentsEvicted { stream, .. }
            | EventPayload::WorkerStarted { stream, .. }
            | EventPayload::WorkerExited { stream, .. }
            | EventPayload::WorkerRestarted { stream, .. } => stream,
        }
    }
}

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);
        tracing::debug!(stream = event.payload.stream(), event = ?event.payload, "Relay event");

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(stream: &str) -> EventPayload {
        EventPayload::SessionCreated {
            stream: stream.into(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.broadcast(EventPayload::SegmentCompleted {
            stream: "alpha".into(),
            sequence: 1,
            duration_secs: 4.0,
            size: 1880,
        });

        let event = rx.try_recv().unwrap();
        match &event.payload {
            EventPayload::SegmentCompleted { sequence, .. } => assert_eq!(*sequence, 1),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(event.payload.stream(), "alpha");
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        for _ in 0..150 {
            bus.broadcast(created("alpha"));
        }
        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn recent_events_newest_first() {
        let bus = EventBus::new(16);
        for _ in 0..10 {
            bus.broadcast(created("alpha"));
        }
        bus.broadcast(created("beta"));

        let recent = bus.recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].payload.stream(), "beta");
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::SessionFailed {
            stream: "alpha".into(),
            session_id: Uuid::new_v4(),
            error: "boom".into(),
        });
        assert_eq!(bus.recent_events(1).len(), 1);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(EventPayload::WorkerRestarted {
            stream: "alpha".into(),
            attempt: 2,
            backoff_ms: 1000,
        })
        .unwrap();
        assert_eq!(json["type"], "worker_restarted");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn default_event_bus() {
        let bus = EventBus::default();
        assert!(bus.recent_events(10).is_empty());
    }
}
