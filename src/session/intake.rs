//! Bounded-duration request intake
//!
//! Each session opens exactly one intake window on its private text
//! channel: free-text messages submitted during the window are resolved
//! and enqueued; the window closes itself after the configured duration
//! (or when the session is destroyed). Messages that cannot be resolved
//! are reported through the event bus and leave the queue untouched.

use crate::events::{EventBus, SessionEvent};
use crate::gateway::UserId;
use crate::playback::Player;
use crate::resolver::TrackResolver;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// One free-text request submitted on a session's text channel
#[derive(Debug, Clone)]
pub struct IntakeMessage {
    pub user_id: UserId,
    pub content: String,
}

/// Handle to a session's single intake window
pub struct IntakeWindow {
    tx: mpsc::Sender<IntakeMessage>,
    task: tokio::task::JoinHandle<()>,
}

impl IntakeWindow {
    /// Open the window; it accepts messages for `window` and then closes.
    pub fn open(
        queue_key: Uuid,
        player: Arc<Player>,
        resolver: Arc<TrackResolver>,
        events: EventBus,
        window: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<IntakeMessage>(32);

        let task = tokio::spawn(async move {
            let timeout = sleep_until(Instant::now() + window);
            tokio::pin!(timeout);

            loop {
                tokio::select! {
                    _ = &mut timeout => {
                        info!("intake window expired for session {}", queue_key);
                        break;
                    }
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        match resolver.resolve(&msg.content, msg.user_id).await {
                            Ok(track) => {
                                // None means the session was destroyed mid-resolution
                                if player.enqueue(track).await.is_none() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(
                                    "intake request \"{}\" on session {} rejected: {}",
                                    msg.content, queue_key, e
                                );
                                events.emit_lossy(SessionEvent::IntakeRejected {
                                    queue_key,
                                    query: msg.content,
                                    reason: e.to_string(),
                                    timestamp: Utc::now(),
                                });
                            }
                        }
                    }
                }
            }

            events.emit_lossy(SessionEvent::IntakeClosed {
                queue_key,
                timestamp: Utc::now(),
            });
        });

        Self { tx, task }
    }

    /// Submit a message. Returns false once the window has closed.
    pub async fn submit(&self, msg: IntakeMessage) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Tear the window down immediately (session destruction).
    pub fn close(&self) {
        self.task.abort();
    }
}
