//! Voice transport seam.
//!
//! Sessions talk to the voice connection only through these traits, so the
//! playback state machine can run against songbird in production and against
//! an in-memory recorder in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::packet_source::SharedPacketSource;
use crate::error::Result;

/// How a single `play` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Completion message posted to a session's dispatch loop.
#[derive(Debug)]
pub struct PlaybackEvent {
    pub generation: u64,
    pub outcome: PlaybackOutcome,
}

/// One-shot completion callback handed to [`VoiceHandle::play`].
///
/// `notify` consumes the notifier. If it is dropped without firing (the
/// transport lost the track) a failure outcome is posted instead, so every
/// `play` produces exactly one completion.
pub struct CompletionNotifier {
    events: UnboundedSender<PlaybackEvent>,
    generation: u64,
    fired: bool,
}

impl CompletionNotifier {
    pub(crate) fn new(events: UnboundedSender<PlaybackEvent>, generation: u64) -> Self {
        Self {
            events,
            generation,
            fired: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(mut self, outcome: PlaybackOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: PlaybackOutcome) {
        self.fired = true;
        let event = PlaybackEvent {
            generation: self.generation,
            outcome,
        };
        if self.events.send(event).is_err() {
            // session already gone
            debug!("Evento de reproducción {} descartado", self.generation);
        }
    }
}

impl Drop for CompletionNotifier {
    fn drop(&mut self) {
        if !self.fired {
            self.send(PlaybackOutcome::Failed(
                "el transporte de voz abandonó la pista".into(),
            ));
        }
    }
}

/// Opens voice connections for a guild.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId)
        -> Result<Arc<dyn VoiceHandle>>;
}

/// An attached voice connection.
#[async_trait]
pub trait VoiceHandle: Send + Sync {
    /// Channel the connection is currently attached to.
    fn channel(&self) -> ChannelId;

    async fn move_to(&self, channel_id: ChannelId) -> Result<()>;

    /// Starts streaming `source`. `done` fires once the stream ends, fails or
    /// is stopped.
    async fn play(&self, source: SharedPacketSource, done: CompletionNotifier) -> Result<()>;

    async fn is_playing(&self) -> bool;

    async fn stop(&self);

    async fn disconnect(&self);
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory transport that records every call.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::error::MusicError;

    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub connects: AtomicUsize,
        pub fail_next: AtomicBool,
        pub handles: Mutex<Vec<Arc<FakeHandle>>>,
    }

    impl FakeConnector {
        pub fn handle(&self) -> Option<Arc<FakeHandle>> {
            self.handles.lock().last().cloned()
        }
    }

    #[async_trait]
    impl VoiceConnector for FakeConnector {
        async fn connect(
            &self,
            _guild_id: GuildId,
            channel_id: ChannelId,
        ) -> Result<Arc<dyn VoiceHandle>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(MusicError::Transport("connect refused".into()));
            }
            let handle = Arc::new(FakeHandle::new(channel_id));
            self.handles.lock().push(handle.clone());
            Ok(handle)
        }
    }

    pub(crate) struct FakeHandle {
        channel: Mutex<ChannelId>,
        pub plays: Mutex<Vec<SharedPacketSource>>,
        pub moves: Mutex<Vec<ChannelId>>,
        pending: Mutex<Option<CompletionNotifier>>,
        playing: AtomicBool,
        pub stops: AtomicUsize,
        pub disconnected: AtomicBool,
    }

    impl FakeHandle {
        fn new(channel_id: ChannelId) -> Self {
            Self {
                channel: Mutex::new(channel_id),
                plays: Mutex::new(Vec::new()),
                moves: Mutex::new(Vec::new()),
                pending: Mutex::new(None),
                playing: AtomicBool::new(false),
                stops: AtomicUsize::new(0),
                disconnected: AtomicBool::new(false),
            }
        }

        pub fn play_count(&self) -> usize {
            self.plays.lock().len()
        }

        /// Ends the current stream as the transport would.
        pub fn finish(&self, outcome: PlaybackOutcome) {
            self.playing.store(false, Ordering::SeqCst);
            if let Some(done) = self.pending.lock().take() {
                done.notify(outcome);
            }
        }
    }

    #[async_trait]
    impl VoiceHandle for FakeHandle {
        fn channel(&self) -> ChannelId {
            *self.channel.lock()
        }

        async fn move_to(&self, channel_id: ChannelId) -> Result<()> {
            *self.channel.lock() = channel_id;
            self.moves.lock().push(channel_id);
            Ok(())
        }

        async fn play(&self, source: SharedPacketSource, done: CompletionNotifier) -> Result<()> {
            self.plays.lock().push(source);
            self.playing.store(true, Ordering::SeqCst);
            *self.pending.lock() = Some(done);
            Ok(())
        }

        async fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.finish(PlaybackOutcome::Finished);
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
            self.pending.lock().take();
        }
    }
}
