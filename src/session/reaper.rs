//! Presence-driven session reaping
//!
//! The platform pushes membership updates for media-output channels.
//! Automated accounts do not count as listeners: when the last human
//! leaves a session's voice channel, the session is abandoned and torn
//! down immediately. Updates for channels not owned by any session are
//! ignored.

use crate::events::TeardownReason;
use crate::gateway::{ChannelId, UserId};
use crate::session::registry::SessionRegistry;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// One member currently in a media-output channel
#[derive(Debug, Clone, Deserialize)]
pub struct Occupant {
    pub user_id: UserId,
    #[serde(default)]
    pub is_automated: bool,
}

/// Full occupancy of one channel after a membership change
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdate {
    pub channel_id: ChannelId,
    pub occupants: Vec<Occupant>,
}

/// Reaps sessions whose voice channels have no human occupants left
pub struct Reaper {
    registry: Arc<SessionRegistry>,
}

impl Reaper {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Apply one membership update. Destroys the owning session when no
    /// non-automated occupant remains.
    pub async fn handle_presence(&self, update: PresenceUpdate) {
        let humans = update
            .occupants
            .iter()
            .filter(|o| !o.is_automated)
            .count();
        if humans > 0 {
            return;
        }

        let Some(queue_key) = self.registry.session_for_voice(update.channel_id).await else {
            debug!("presence update for unmanaged channel {}", update.channel_id);
            return;
        };

        info!(
            "channel {} abandoned; reaping session {}",
            update.channel_id, queue_key
        );
        self.registry
            .destroy(queue_key, TeardownReason::Abandoned)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::gateway::testing::FakeGateway;
    use crate::resolver::TrackResolver;
    use std::time::Duration;

    fn human(user_id: UserId) -> Occupant {
        Occupant {
            user_id,
            is_automated: false,
        }
    }

    fn bot(user_id: UserId) -> Occupant {
        Occupant {
            user_id,
            is_automated: true,
        }
    }

    async fn setup() -> (Reaper, Arc<SessionRegistry>, FakeGateway) {
        let gateway = FakeGateway::new();
        let registry = SessionRegistry::new(
            Arc::new(gateway.clone()),
            Arc::new(TrackResolver::new("http://127.0.0.1:1/search".into())),
            EventBus::new(64),
            10,
            Duration::from_secs(300),
        );
        (Reaper::new(Arc::clone(&registry)), registry, gateway)
    }

    #[tokio::test]
    async fn test_empty_channel_reaps_session() {
        let (reaper, registry, gateway) = setup().await;
        let record = registry.create(1, 100).await.unwrap();

        reaper
            .handle_presence(PresenceUpdate {
                channel_id: record.channels.voice,
                occupants: vec![],
            })
            .await;

        assert_eq!(registry.active_sessions().await, 0);
        assert_eq!(gateway.deleted_channels().len(), 2);
    }

    #[tokio::test]
    async fn test_only_automated_occupants_counts_as_abandoned() {
        let (reaper, registry, _gateway) = setup().await;
        let record = registry.create(1, 100).await.unwrap();

        reaper
            .handle_presence(PresenceUpdate {
                channel_id: record.channels.voice,
                occupants: vec![bot(900), bot(901)],
            })
            .await;

        assert_eq!(registry.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_human_presence_keeps_session_alive() {
        let (reaper, registry, _gateway) = setup().await;
        let record = registry.create(1, 100).await.unwrap();

        reaper
            .handle_presence(PresenceUpdate {
                channel_id: record.channels.voice,
                occupants: vec![bot(900), human(100)],
            })
            .await;

        assert_eq!(registry.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_unmanaged_channel_is_ignored() {
        let (reaper, registry, _gateway) = setup().await;
        registry.create(1, 100).await.unwrap();

        reaper
            .handle_presence(PresenceUpdate {
                channel_id: 424242,
                occupants: vec![],
            })
            .await;

        assert_eq!(registry.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_presence_flicker_tears_down_once() {
        let (reaper, registry, gateway) = setup().await;
        let record = registry.create(1, 100).await.unwrap();

        // Leave, rejoin notification arrives late, leave again
        for _ in 0..2 {
            reaper
                .handle_presence(PresenceUpdate {
                    channel_id: record.channels.voice,
                    occupants: vec![],
                })
                .await;
        }

        // Both updates resolve to one teardown and two channel deletions
        assert_eq!(gateway.deleted_channels().len(), 2);
        assert_eq!(registry.active_sessions().await, 0);
    }
}
