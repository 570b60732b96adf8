//! Event system for jamroom
//!
//! Hybrid communication model:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting,
//!   consumed by the SSE endpoint and by tests
//! - **Command channels** (tokio::mpsc): request to a single handler
//!   (stream signals, teardown requests)
//! - **Shared state** (Arc + async Mutex): registry and per-session player
//!
//! Events describe session lifecycle and playback progression; the
//! presentation layer renders them into user-facing messages.

use crate::playback::state::PlaybackState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    /// Last non-automated occupant left the media-output channel
    Abandoned,
    /// Explicit close by the owner or the dispatch layer
    Closed,
    /// Output device failure (media channel lost)
    DeviceLost,
}

/// Session lifecycle and playback events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A session was created and its channel pair allocated
    SessionCreated {
        queue_key: Uuid,
        community_id: u64,
        user_id: u64,
        timestamp: DateTime<Utc>,
    },

    /// A session was destroyed and fully evicted
    SessionDestroyed {
        queue_key: Uuid,
        reason: TeardownReason,
        timestamp: DateTime<Utc>,
    },

    /// A resolved track was appended to a session queue
    TrackEnqueued {
        queue_key: Uuid,
        title: String,
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// A track's stream was opened and playback began
    TrackStarted {
        queue_key: Uuid,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback state transition (idle/playing/paused)
    PlaybackStateChanged {
        queue_key: Uuid,
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// The queue ran out after completion/skip and the session went idle
    QueueExhausted {
        queue_key: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An intake-window request could not be resolved into a track
    IntakeRejected {
        queue_key: Uuid,
        query: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The bounded request-intake window for a session ended
    IntakeClosed {
        queue_key: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Event type string, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "SessionCreated",
            SessionEvent::SessionDestroyed { .. } => "SessionDestroyed",
            SessionEvent::TrackEnqueued { .. } => "TrackEnqueued",
            SessionEvent::TrackStarted { .. } => "TrackStarted",
            SessionEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            SessionEvent::QueueExhausted { .. } => "QueueExhausted",
            SessionEvent::IntakeRejected { .. } => "IntakeRejected",
            SessionEvent::IntakeClosed { .. } => "IntakeClosed",
        }
    }
}

/// Broadcast bus for [`SessionEvent`]
///
/// Emission is lossy by design: components emit and continue regardless of
/// whether anyone is listening.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(100);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(10);

        // Should not panic with no receivers
        bus.emit_lossy(SessionEvent::QueueExhausted {
            queue_key: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let key = Uuid::new_v4();

        bus.emit_lossy(SessionEvent::PlaybackStateChanged {
            queue_key: key,
            state: PlaybackState::Playing,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            SessionEvent::PlaybackStateChanged { queue_key, state, .. } => {
                assert_eq!(queue_key, key);
                assert_eq!(state, PlaybackState::Playing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = SessionEvent::SessionDestroyed {
            queue_key: Uuid::nil(),
            reason: TeardownReason::Abandoned,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"SessionDestroyed\""));
        assert!(json.contains("\"reason\":\"abandoned\""));
        assert_eq!(event.event_type(), "SessionDestroyed");
    }
}
