use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tracing::info;

use super::{session::PlaybackSession, transport::VoiceConnector};

/// Guild → session map, owned by the bot and handed to command handlers.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    connector: Arc<dyn VoiceConnector>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn VoiceConnector>) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
        }
    }

    /// Existing session only; never creates one.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Nueva sesión de reproducción para {}", guild_id);
                PlaybackSession::new(guild_id, self.connector.clone())
            })
            .clone()
    }

    /// Drops sessions that have been Idle for at least `threshold`.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            session
                .idle_for()
                .map_or(true, |idle| idle < threshold)
        });

        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!("🧹 {} sesiones inactivas eliminadas", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::model::id::{ChannelId, UserId};

    use crate::audio::{
        queue::tests::RecordingSink, session::VoiceChannel, transport::fake::FakeConnector,
    };
    use crate::sources::tests::fixture_track;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(FakeConnector::default()))
    }

    #[tokio::test]
    async fn get_never_creates_sessions() {
        let registry = registry();
        assert!(registry.get(GuildId::new(1)).is_none());
        assert_eq!(registry.len(), 0);

        let created = registry.get_or_create(GuildId::new(1));
        let fetched = registry.get(GuildId::new(1)).unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert!(Arc::ptr_eq(&created, &registry.get_or_create(GuildId::new(1))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_guild() {
        let registry = registry();
        let a = registry.get_or_create(GuildId::new(1));
        let b = registry.get_or_create(GuildId::new(2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.guild_id(), GuildId::new(1));
        assert_eq!(b.guild_id(), GuildId::new(2));
    }

    #[tokio::test]
    async fn only_idle_sessions_are_evicted() {
        let registry = registry();
        registry.get_or_create(GuildId::new(1));
        let busy = registry.get_or_create(GuildId::new(2));
        busy.play_or_queue(
            fixture_track("x"),
            VoiceChannel {
                guild_id: GuildId::new(2),
                channel_id: ChannelId::new(20),
            },
            UserId::new(1),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_idle(Duration::ZERO), 1);
        assert!(registry.get(GuildId::new(1)).is_none());
        assert!(registry.get(GuildId::new(2)).is_some());
    }
}
