//! Session registry
//!
//! Owns every live media session: capacity enforcement, one-session-per-
//! owner deduplication, channel allocation and rollback, command routing
//! by owner or ambient voice channel, and teardown. All lookup maps live
//! under one lock and are updated together, so a session is either fully
//! visible or fully gone.
//!
//! Teardown ordering: a session is evicted from every map before its
//! player is shut down or its channels deleted. Commands racing a destroy
//! therefore see "no active session" rather than a half-dead one.

use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent, TeardownReason};
use crate::gateway::{ChannelId, ChannelPair, CommunityId, Gateway, UserId};
use crate::playback::{PlaybackState, Player};
use crate::resolver::{Track, TrackResolver};
use crate::session::intake::{IntakeMessage, IntakeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Public description of one live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub queue_key: Uuid,
    pub community_id: CommunityId,
    pub user_id: UserId,
    pub channels: ChannelPair,
    pub created_at: DateTime<Utc>,
}

struct Session {
    record: SessionRecord,
    player: Arc<Player>,
    intake: IntakeWindow,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<Uuid, Arc<Session>>,
    by_owner: HashMap<(CommunityId, UserId), Uuid>,
    by_voice: HashMap<ChannelId, Uuid>,
    by_text: HashMap<ChannelId, Uuid>,
    /// Owners whose channel allocation is still in flight
    pending_owners: HashSet<(CommunityId, UserId)>,
    /// Capacity slots held by in-flight creations
    reserved: usize,
}

/// Result of a successful enqueue, for user feedback
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
    pub title: String,
    pub position: usize,
}

/// Read-only view of one session's queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub tracks: Vec<QueueLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueLine {
    pub title: String,
    pub requested_by: UserId,
}

pub struct SessionRegistry {
    gateway: Arc<dyn Gateway>,
    resolver: Arc<TrackResolver>,
    events: EventBus,
    max_sessions: usize,
    intake_window: Duration,
    teardown_tx: mpsc::Sender<Uuid>,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    /// Build the registry and spawn its teardown listener, which reaps
    /// sessions whose players reported device loss.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        resolver: Arc<TrackResolver>,
        events: EventBus,
        max_sessions: usize,
        intake_window: Duration,
    ) -> Arc<Self> {
        let (teardown_tx, mut teardown_rx) = mpsc::channel::<Uuid>(16);

        let registry = Arc::new(Self {
            gateway,
            resolver,
            events,
            max_sessions,
            intake_window,
            teardown_tx,
            inner: Mutex::new(RegistryInner::default()),
        });

        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some(queue_key) = teardown_rx.recv().await {
                let Some(registry) = weak.upgrade() else { break };
                registry.destroy(queue_key, TeardownReason::DeviceLost).await;
            }
        });

        registry
    }

    /// Create a session for `(community_id, user_id)`.
    ///
    /// The capacity slot and the owner are both claimed under the lock
    /// before any channel is allocated, so concurrent creations can never
    /// oversubscribe capacity or race the same owner. If channel
    /// allocation fails the claim is released.
    pub async fn create(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<SessionRecord> {
        let owner = (community_id, user_id);
        {
            let mut inner = self.inner.lock().await;
            if inner.by_owner.contains_key(&owner) || inner.pending_owners.contains(&owner) {
                return Err(Error::DuplicateSession);
            }
            if inner.sessions.len() + inner.reserved >= self.max_sessions {
                return Err(Error::CapacityExceeded);
            }
            inner.reserved += 1;
            inner.pending_owners.insert(owner);
        }

        let channels = match self.gateway.create_channel_pair(community_id, user_id).await {
            Ok(channels) => channels,
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.reserved -= 1;
                inner.pending_owners.remove(&owner);
                return Err(e);
            }
        };

        let queue_key = Uuid::new_v4();
        let player = Player::new(
            queue_key,
            channels.voice,
            Arc::clone(&self.gateway),
            self.events.clone(),
            self.teardown_tx.clone(),
        );
        let intake = IntakeWindow::open(
            queue_key,
            Arc::clone(&player),
            Arc::clone(&self.resolver),
            self.events.clone(),
            self.intake_window,
        );
        let record = SessionRecord {
            queue_key,
            community_id,
            user_id,
            channels,
            created_at: Utc::now(),
        };
        let session = Arc::new(Session {
            record: record.clone(),
            player,
            intake,
        });

        {
            let mut inner = self.inner.lock().await;
            inner.reserved -= 1;
            inner.pending_owners.remove(&owner);
            inner.by_owner.insert(owner, queue_key);
            inner.by_voice.insert(channels.voice, queue_key);
            inner.by_text.insert(channels.text, queue_key);
            inner.sessions.insert(queue_key, session);
        }

        info!(
            "session {} created for user {} in community {} (text {}, voice {})",
            queue_key, user_id, community_id, channels.text, channels.voice
        );
        self.events.emit_lossy(SessionEvent::SessionCreated {
            queue_key,
            community_id,
            user_id,
            timestamp: Utc::now(),
        });

        Ok(record)
    }

    /// Destroy a session. Idempotent: concurrent or repeated calls for the
    /// same key resolve to a single teardown. Returns false when the key
    /// was not (or no longer) registered.
    pub async fn destroy(&self, queue_key: Uuid, reason: TeardownReason) -> bool {
        let session = {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.sessions.remove(&queue_key) else {
                return false;
            };
            let record = &session.record;
            inner
                .by_owner
                .remove(&(record.community_id, record.user_id));
            inner.by_voice.remove(&record.channels.voice);
            inner.by_text.remove(&record.channels.text);
            session
        };

        info!("destroying session {} ({:?})", queue_key, reason);
        session.intake.close();
        session.player.shutdown().await;

        // Channel deletion failures must not leave the session half-alive;
        // the maps are already clean, so log and move on.
        for channel in [session.record.channels.text, session.record.channels.voice] {
            if let Err(e) = self.gateway.delete_channel(channel).await {
                warn!(
                    "deleting channel {} during teardown of {} failed: {}",
                    channel, queue_key, e
                );
            }
        }

        self.events.emit_lossy(SessionEvent::SessionDestroyed {
            queue_key,
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    /// Destroy the session owned by `(community_id, user_id)`, if any.
    pub async fn close_owned(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Uuid> {
        let queue_key = {
            let inner = self.inner.lock().await;
            inner
                .by_owner
                .get(&(community_id, user_id))
                .copied()
                .ok_or(Error::NoActiveSession)?
        };
        self.destroy(queue_key, TeardownReason::Closed).await;
        Ok(queue_key)
    }

    /// Route a command to a session: the caller's own session first, then
    /// the session whose voice channel the caller is sitting in.
    async fn route(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<Arc<Session>> {
        let inner = self.inner.lock().await;
        let key = inner
            .by_owner
            .get(&(community_id, user_id))
            .or_else(|| ambient_voice.and_then(|ch| inner.by_voice.get(&ch)))
            .copied()
            .ok_or(Error::NoActiveSession)?;
        inner
            .sessions
            .get(&key)
            .cloned()
            .ok_or(Error::NoActiveSession)
    }

    /// Resolve `query` and enqueue it on the routed session.
    ///
    /// Resolution happens outside every lock. `Ok(None)` means the session
    /// was destroyed while the track was resolving; the command is stale
    /// and has no effect.
    pub async fn play(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
        query: &str,
    ) -> Result<Option<EnqueueOutcome>> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        let track = self.resolver.resolve(query, user_id).await?;
        let title = track.title.clone();
        Ok(session
            .player
            .enqueue(track)
            .await
            .map(|position| EnqueueOutcome { title, position }))
    }

    pub async fn skip(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<()> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        session.player.skip().await
    }

    pub async fn stop(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<()> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        session.player.stop().await
    }

    pub async fn pause(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<()> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        session.player.pause().await
    }

    pub async fn resume(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<()> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        session.player.resume().await
    }

    /// Read-only queue view for the routed session.
    pub async fn queue_snapshot(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        ambient_voice: Option<ChannelId>,
    ) -> Result<QueueSnapshot> {
        let session = self.route(community_id, user_id, ambient_voice).await?;
        let (state, tracks) = session
            .player
            .snapshot()
            .await
            .ok_or(Error::NoActiveSession)?;
        Ok(QueueSnapshot {
            state,
            tracks: tracks
                .into_iter()
                .map(|t: Track| QueueLine {
                    title: t.title,
                    requested_by: t.requested_by,
                })
                .collect(),
        })
    }

    /// Forward a free-text message to the intake window of the session
    /// owning `text_channel`. Returns false when the window has closed.
    pub async fn submit_intake(
        &self,
        text_channel: ChannelId,
        user_id: UserId,
        content: String,
    ) -> Result<bool> {
        let session = {
            let inner = self.inner.lock().await;
            inner
                .by_text
                .get(&text_channel)
                .and_then(|key| inner.sessions.get(key))
                .cloned()
                .ok_or(Error::NoActiveSession)?
        };
        Ok(session.intake.submit(IntakeMessage { user_id, content }).await)
    }

    /// Session keyed by its voice channel, if any (presence handling).
    pub async fn session_for_voice(&self, channel: ChannelId) -> Option<Uuid> {
        self.inner.lock().await.by_voice.get(&channel).copied()
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}
