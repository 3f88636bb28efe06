//! Per-guild playback state machine.
//!
//! Every operation takes the session's state mutex, so play, skip, stop and
//! queue advancement never interleave. Completions from the voice transport
//! arrive as [`PlaybackEvent`]s on a channel drained by one dispatch task per
//! session. Notices are collected under the lock and delivered after it is
//! released.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use serenity::model::id::{ChannelId, GuildId, UserId};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use tracing::{debug, info, warn};

use super::{
    queue::{MusicQueue, NoticeKind, QueueEntry, ReplySink},
    transport::{CompletionNotifier, PlaybackEvent, PlaybackOutcome, VoiceConnector, VoiceHandle},
};
use crate::{
    error::{MusicError, Result},
    sources::Track,
};

/// Connections closed by the session whose leave event may still be in
/// flight. Older ones are forgotten.
const MAX_RELEASED_CONNECTIONS: usize = 4;

/// A voice channel together with the guild that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceChannel {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Playing,
    Draining,
}

/// Notices waiting for the state lock to be released.
type Notices = Vec<(QueueEntry, NoticeKind)>;

struct SessionState {
    queue: MusicQueue,
    handle: Option<Arc<dyn VoiceHandle>>,
    /// Generation of the stream currently playing the head, if any.
    active: Option<u64>,
    status: SessionStatus,
    idle_since: Option<Instant>,
    /// Channels of connections this session disconnected itself.
    released: VecDeque<ChannelId>,
}

pub struct PlaybackSession {
    guild_id: GuildId,
    connector: Arc<dyn VoiceConnector>,
    state: Mutex<SessionState>,
    events: UnboundedSender<PlaybackEvent>,
    generation: AtomicU64,
}

impl PlaybackSession {
    /// Creates the session and spawns its dispatch loop. Must be called
    /// inside the tokio runtime.
    pub fn new(guild_id: GuildId, connector: Arc<dyn VoiceConnector>) -> Arc<Self> {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            guild_id,
            connector,
            state: Mutex::new(SessionState {
                queue: MusicQueue::new(),
                handle: None,
                active: None,
                status: SessionStatus::Idle,
                idle_since: Some(Instant::now()),
                released: VecDeque::new(),
            }),
            events,
            generation: AtomicU64::new(0),
        });

        tokio::spawn(Self::dispatch(Arc::downgrade(&session), receiver));
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn dispatch(session: Weak<Self>, mut receiver: UnboundedReceiver<PlaybackEvent>) {
        while let Some(event) = receiver.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.on_completion(event).await;
        }
    }

    async fn deliver(notices: Notices) {
        for (entry, kind) in notices {
            entry.notify(kind).await;
        }
    }

    /// Queues `track` for `channel` and starts it right away when nothing is
    /// playing.
    pub async fn play_or_queue(
        &self,
        track: Track,
        channel: VoiceChannel,
        requester: UserId,
        reply: Arc<dyn ReplySink>,
    ) -> Result<()> {
        if channel.guild_id != self.guild_id {
            return Err(MusicError::CrossGuildMisuse {
                session: self.guild_id,
                channel_guild: channel.guild_id,
            });
        }

        let mut notices = Notices::new();
        let mut state = self.state.lock().await;
        let entry = QueueEntry::new(track, requester, self.guild_id, channel.channel_id, reply);
        let position = state.queue.push(entry.clone());
        state.idle_since = None;

        if let Err(e) = self.attach(&mut state, channel.channel_id).await {
            warn!("❌ No se pudo conectar al canal de voz en {}: {}", self.guild_id, e);
            if let Some(rolled_back) = state.queue.pop_back() {
                rolled_back.cleanup();
            }
            if state.queue.is_empty() {
                state.status = SessionStatus::Idle;
                state.idle_since = Some(Instant::now());
            }
            return Err(e);
        }

        if position > 0 {
            notices.push((entry, NoticeKind::Queued { position }));
        }

        let busy = match &state.handle {
            Some(handle) => state.active.is_some() || handle.is_playing().await,
            None => false,
        };
        if !busy {
            self.start_head(&mut state, &mut notices).await;
        }

        drop(state);
        Self::deliver(notices).await;
        Ok(())
    }

    /// Connects when detached, moves when attached elsewhere.
    async fn attach(&self, state: &mut SessionState, channel_id: ChannelId) -> Result<()> {
        match &state.handle {
            None => {
                state.status = SessionStatus::Connecting;
                info!("🔊 Conectando a canal de voz {} en {}", channel_id, self.guild_id);
                let handle = self.connector.connect(self.guild_id, channel_id).await?;
                state.handle = Some(handle);
            }
            Some(handle) if handle.channel() != channel_id => {
                info!("🔀 Moviendo al canal de voz {} en {}", channel_id, self.guild_id);
                handle.move_to(channel_id).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Starts the head of the queue. Tracks that fail to start are reported
    /// and skipped; an empty queue drains the session.
    async fn start_head(&self, state: &mut SessionState, notices: &mut Notices) {
        loop {
            let Some(head) = state.queue.current().cloned() else {
                self.drain(state);
                return;
            };
            let Some(handle) = state.handle.clone() else {
                // transport is gone, nothing can play
                for entry in state.queue.clear() {
                    entry.cleanup();
                }
                self.drain(state);
                return;
            };

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let started = match head.track.preload().await {
                Ok(()) => {
                    let done = CompletionNotifier::new(self.events.clone(), generation);
                    handle.play(head.track.source.clone(), done).await
                }
                Err(e) => Err(e),
            };

            match started {
                Ok(()) => {
                    state.active = Some(generation);
                    state.status = SessionStatus::Playing;
                    info!("🎵 Reproduciendo: {} en {}", head.track.title, self.guild_id);
                    notices.push((head, NoticeKind::NowPlaying));
                    return;
                }
                Err(e) => {
                    warn!("⚠️ No se pudo iniciar {}: {}", head.track.title, e);
                    if let Some(failed) = state.queue.pop_front() {
                        failed.cleanup();
                    }
                    notices.push((
                        head,
                        NoticeKind::Failed {
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }
    }

    async fn on_completion(&self, event: PlaybackEvent) {
        let mut notices = Notices::new();
        let mut state = self.state.lock().await;
        if state.active != Some(event.generation) {
            debug!(
                "Evento de reproducción obsoleto {} ignorado en {}",
                event.generation, self.guild_id
            );
            return;
        }
        state.active = None;

        if let Some(entry) = state.queue.pop_front() {
            entry.cleanup();
            if let PlaybackOutcome::Failed(reason) = event.outcome {
                warn!("⚠️ Falló la reproducción de {}: {}", entry.track.title, reason);
                notices.push((entry, NoticeKind::Failed { reason }));
            } else {
                debug!("✅ Terminó: {}", entry.track.title);
            }
        }

        self.start_head(&mut state, &mut notices).await;
        drop(state);
        Self::deliver(notices).await;
    }

    /// Releases the voice connection in the background and returns to Idle.
    fn drain(&self, state: &mut SessionState) {
        state.active = None;
        if let Some(handle) = state.handle.take() {
            state.status = SessionStatus::Draining;
            info!("👋 Cola vacía en {}, desconectando", self.guild_id);
            state.released.push_back(handle.channel());
            if state.released.len() > MAX_RELEASED_CONNECTIONS {
                state.released.pop_front();
            }
            tokio::spawn(async move { handle.disconnect().await });
        }
        state.status = SessionStatus::Idle;
        state.idle_since = Some(Instant::now());
    }

    /// Stops the current track. The queue advances once the transport
    /// reports the stop, so callers must not expect it to have moved yet.
    pub async fn skip_current_song(&self) -> Option<QueueEntry> {
        let mut notices = Notices::new();
        let mut state = self.state.lock().await;
        let skipped = self.skip_locked(&mut state, &mut notices).await;
        drop(state);
        Self::deliver(notices).await;
        skipped
    }

    async fn skip_locked(
        &self,
        state: &mut SessionState,
        notices: &mut Notices,
    ) -> Option<QueueEntry> {
        let head = state.queue.current().cloned()?;
        match (&state.handle, state.active) {
            (Some(handle), Some(_)) => {
                info!("⏭️ Saltando: {}", head.track.title);
                handle.stop().await;
            }
            _ => {
                if let Some(entry) = state.queue.pop_front() {
                    entry.cleanup();
                }
                self.start_head(state, notices).await;
            }
        }
        Some(head)
    }

    /// Drops every pending entry and stops the current one.
    pub async fn stop(&self) -> Option<QueueEntry> {
        let mut notices = Notices::new();
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            return None;
        }
        for entry in state.queue.truncate_to_head() {
            entry.cleanup();
        }
        info!("⏹️ Reproducción detenida en {}", self.guild_id);
        let stopped = self.skip_locked(&mut state, &mut notices).await;
        drop(state);
        Self::deliver(notices).await;
        stopped
    }

    /// Reacts to membership changes; only an empty attached channel matters.
    pub async fn on_listeners_changed(&self, channel_id: ChannelId, listeners: usize) {
        if listeners > 0 {
            return;
        }

        let mut state = self.state.lock().await;
        let Some(handle) = state.handle.clone() else {
            return;
        };
        if handle.channel() != channel_id {
            return;
        }

        info!("🚪 Canal {} sin oyentes, deteniendo en {}", channel_id, self.guild_id);
        // the stop completion becomes stale
        state.active = None;
        handle.stop().await;
        for entry in state.queue.clear() {
            entry.cleanup();
        }
        self.drain(&mut state);
    }

    /// The voice connection was closed from outside (kick, channel deleted).
    ///
    /// `left` is the channel the bot was in, when known. Leave events for
    /// connections the session closed itself are ignored, so a late event
    /// from a drained connection never tears down a newer one.
    pub async fn transport_disconnected(&self, left: Option<ChannelId>) {
        let mut state = self.state.lock().await;

        let own = match left {
            Some(channel_id) => state.released.iter().position(|c| *c == channel_id),
            None => (!state.released.is_empty()).then_some(0),
        };
        if let Some(index) = own {
            state.released.remove(index);
            debug!("Desconexión propia {:?} ignorada en {}", left, self.guild_id);
            return;
        }

        let Some(handle) = state.handle.clone() else {
            return;
        };
        if left.is_some_and(|channel_id| channel_id != handle.channel()) {
            debug!("Desconexión de otro canal {:?} ignorada en {}", left, self.guild_id);
            return;
        }

        state.handle = None;
        info!("🔌 Conexión de voz cerrada en {}", self.guild_id);
        // no transport left to report completions
        state.active = None;
        handle.stop().await;
        for entry in state.queue.clear() {
            entry.cleanup();
        }
        state.status = SessionStatus::Idle;
        state.idle_since = Some(Instant::now());
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn now_playing(&self) -> Option<QueueEntry> {
        let state = self.state.lock().await;
        state.active.and(state.queue.current().cloned())
    }

    /// How long the session has been Idle. `None` while busy or while
    /// another operation holds the session.
    pub fn idle_for(&self) -> Option<Duration> {
        let state = self.state.try_lock().ok()?;
        match state.status {
            SessionStatus::Idle => state.idle_since.map(|since| since.elapsed()),
            _ => None,
        }
    }
}
