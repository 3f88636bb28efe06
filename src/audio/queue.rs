use std::{collections::VecDeque, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, GuildId, UserId};
use tracing::{debug, info};

use crate::sources::Track;

/// Qué le pasó a un track de la cola
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    NowPlaying,
    /// Posición contada desde el track actual (1 = siguiente)
    Queued { position: usize },
    Skipped,
    Stopped,
    Failed { reason: String },
}

/// Aviso estructurado para el sink de respuestas. El texto visible lo arma
/// el front end.
#[derive(Debug, Clone)]
pub struct PlaybackNotice {
    pub kind: NoticeKind,
    pub track: Track,
    pub requester: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Destino de los avisos de progreso de una entrada
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, notice: PlaybackNotice);
}

#[derive(Clone)]
pub struct QueueEntry {
    pub track: Track,
    pub requester: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub added_at: DateTime<Utc>,
    reply: Arc<dyn ReplySink>,
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("track", &self.track.title)
            .field("requester", &self.requester)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl QueueEntry {
    pub fn new(
        track: Track,
        requester: UserId,
        guild_id: GuildId,
        channel_id: ChannelId,
        reply: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            track,
            requester,
            guild_id,
            channel_id,
            added_at: Utc::now(),
            reply,
        }
    }

    pub fn notice(&self, kind: NoticeKind) -> PlaybackNotice {
        PlaybackNotice {
            kind,
            track: self.track.clone(),
            requester: self.requester,
            guild_id: self.guild_id,
            channel_id: self.channel_id,
        }
    }

    pub async fn notify(&self, kind: NoticeKind) {
        self.reply.send(self.notice(kind)).await;
    }

    /// Libera los procesos detrás del audio de la entrada
    pub fn cleanup(&self) {
        self.track.source.cleanup();
    }
}

/// Cola FIFO cuya cabeza es el track que está sonando
#[derive(Debug, Default)]
pub struct MusicQueue {
    items: VecDeque<QueueEntry>,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track a la cola y devuelve su posición (0 = cabeza)
    pub fn push(&mut self, entry: QueueEntry) -> usize {
        info!("➕ Agregado a la cola: {}", entry.track.title);
        self.items.push_back(entry);
        self.items.len() - 1
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.items.front()
    }

    /// Quita la cabeza de la cola (FIFO)
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        let entry = self.items.pop_front();
        if let Some(next) = self.items.front() {
            debug!("➡️ Siguiente en cola: {}", next.track.title);
        }
        entry
    }

    /// Quita el último track agregado
    pub fn pop_back(&mut self) -> Option<QueueEntry> {
        self.items.pop_back()
    }

    /// Deja solo la cabeza y devuelve lo descartado
    pub fn truncate_to_head(&mut self) -> Vec<QueueEntry> {
        let dropped: Vec<_> = self.items.drain(self.items.len().min(1)..).collect();
        if !dropped.is_empty() {
            info!("🗑️ Descartadas {} canciones pendientes", dropped.len());
        }
        dropped
    }

    /// Vacía la cola completa
    pub fn clear(&mut self) -> Vec<QueueEntry> {
        let dropped: Vec<_> = self.items.drain(..).collect();
        if !dropped.is_empty() {
            info!("🗑️ Cola limpiada");
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::sources::tests::fixture_track;

    /// Sink que guarda cada aviso recibido
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub notices: Mutex<Vec<PlaybackNotice>>,
    }

    impl RecordingSink {
        pub fn kinds(&self) -> Vec<NoticeKind> {
            self.notices.lock().iter().map(|n| n.kind.clone()).collect()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send(&self, notice: PlaybackNotice) {
            self.notices.lock().push(notice);
        }
    }

    fn entry(title: &str) -> QueueEntry {
        QueueEntry::new(
            fixture_track(title),
            UserId::new(1),
            GuildId::new(10),
            ChannelId::new(100),
            Arc::new(RecordingSink::default()),
        )
    }

    fn titles(queue: &MusicQueue) -> Vec<String> {
        queue.items.iter().map(|e| e.track.title.clone()).collect()
    }

    #[test]
    fn push_reports_position_after_head() {
        let mut queue = MusicQueue::new();
        assert_eq!(queue.push(entry("a")), 0);
        assert_eq!(queue.push(entry("b")), 1);
        assert_eq!(queue.current().map(|e| e.track.title.as_str()), Some("a"));
    }

    #[test]
    fn truncate_keeps_only_the_head() {
        let mut queue = MusicQueue::new();
        for t in ["a", "b", "c"] {
            queue.push(entry(t));
        }
        let dropped = queue.truncate_to_head();
        assert_eq!(dropped.len(), 2);
        assert_eq!(titles(&queue), vec!["a".to_string()]);

        let mut empty = MusicQueue::new();
        assert!(empty.truncate_to_head().is_empty());
    }

    #[test]
    fn pop_order_is_fifo() {
        let mut queue = MusicQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));
        assert_eq!(queue.pop_back().unwrap().track.title, "b");
        queue.push(entry("c"));
        assert_eq!(queue.pop_front().unwrap().track.title, "a");
        assert_eq!(titles(&queue), vec!["c".to_string()]);
        assert_eq!(queue.clear().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn notify_carries_entry_identity() {
        let sink = Arc::new(RecordingSink::default());
        let entry = QueueEntry::new(
            fixture_track("song"),
            UserId::new(5),
            GuildId::new(10),
            ChannelId::new(100),
            sink.clone(),
        );
        entry.notify(NoticeKind::Queued { position: 2 }).await;

        let notices = sink.notices.lock();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Queued { position: 2 });
        assert_eq!(notices[0].requester, UserId::new(5));
        assert_eq!(notices[0].channel_id, ChannelId::new(100));
        assert_eq!(notices[0].track.title, "song");
    }
}
