//! Voice transport backed by songbird.
//!
//! Packet sources are re-muxed into Ogg and handed to songbird as a raw live
//! input, so the driver demuxes Opus frames and forwards them without
//! re-encoding.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use symphonia::core::{
    io::{MediaSource, ReadOnlySource},
    probe::Hint,
};
use tracing::{debug, info, warn};

use super::{
    packet_source::{OggRemuxReader, PacketSource, SharedPacketSource},
    transport::{CompletionNotifier, PlaybackOutcome, VoiceConnector, VoiceHandle},
};
use crate::error::{MusicError, Result};

pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceHandle>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Transport(format!("no se pudo unir al canal: {e}")))?;

        info!("🔊 Conectado a canal de voz {} en {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdHandle {
            manager: self.manager.clone(),
            guild_id,
            channel: Mutex::new(channel_id),
            call,
            current: Mutex::new(None),
        }))
    }
}

pub struct SongbirdHandle {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel: Mutex<ChannelId>,
    call: Arc<tokio::sync::Mutex<Call>>,
    current: Mutex<Option<TrackHandle>>,
}

fn ogg_input(source: SharedPacketSource) -> Input {
    debug_assert!(PacketSource::is_framed_as_opus());
    let mut hint = Hint::new();
    hint.with_extension("ogg");
    let media: Box<dyn MediaSource> =
        Box::new(ReadOnlySource::new(OggRemuxReader::new(source)));
    Input::Live(
        LiveInput::Raw(AudioStream {
            input: media,
            hint: Some(hint),
        }),
        None,
    )
}

#[async_trait]
impl VoiceHandle for SongbirdHandle {
    fn channel(&self) -> ChannelId {
        *self.channel.lock()
    }

    async fn move_to(&self, channel_id: ChannelId) -> Result<()> {
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Transport(format!("no se pudo mover al canal: {e}")))?;
        *self.channel.lock() = channel_id;
        Ok(())
    }

    async fn play(&self, source: SharedPacketSource, done: CompletionNotifier) -> Result<()> {
        let generation = done.generation();
        let track = self.call.lock().await.play_only_input(ogg_input(source));

        let done = Arc::new(Mutex::new(Some(done)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            track
                .add_event(
                    Event::Track(event),
                    CompletionHandler {
                        done: done.clone(),
                    },
                )
                .map_err(|e| {
                    MusicError::Transport(format!("Error al agregar event handler: {e}"))
                })?;
        }

        debug!("▶️ Pista {} enviada a songbird en {}", generation, self.guild_id);
        *self.current.lock() = Some(track);
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        let Some(track) = self.current.lock().clone() else {
            return false;
        };
        match track.get_info().await {
            Ok(info) => matches!(info.playing, PlayMode::Play | PlayMode::Pause),
            Err(_) => false,
        }
    }

    async fn stop(&self) {
        if let Some(track) = self.current.lock().take() {
            if let Err(e) = track.stop() {
                debug!("La pista ya había terminado: {}", e);
            }
        }
    }

    async fn disconnect(&self) {
        self.current.lock().take();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al desconectar de {}: {}", self.guild_id, e);
        } else {
            info!("👋 Desconectado del canal de voz en {}", self.guild_id);
        }
    }
}

/// Fires the completion notifier on the first End or Error event.
struct CompletionHandler {
    done: Arc<Mutex<Option<CompletionNotifier>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let outcome = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(PlaybackOutcome::Failed(format!("{e:?}"))),
                    _ => None,
                })
                .unwrap_or(PlaybackOutcome::Finished),
            _ => PlaybackOutcome::Finished,
        };

        if let Some(done) = self.done.lock().take() {
            done.notify(outcome);
        }
        Some(Event::Cancel)
    }
}
