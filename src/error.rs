//! Error types shared by the resolver, the audio pipeline and the sessions.

use serenity::model::id::GuildId;
use thiserror::Error;

/// Result alias used across the music core.
pub type Result<T, E = MusicError> = std::result::Result<T, E>;

/// Errors surfaced by track resolution and playback sessions.
#[derive(Debug, Error)]
pub enum MusicError {
    /// The provider answered, but the answer cannot be turned into a track
    /// (unknown ID, missing fields, empty search).
    #[error("invalid track: {0}")]
    InvalidTrack(String),

    /// The provider could not be reached or refused the request.
    #[error("{provider} request failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The yt-dlp / ffmpeg pipeline could not be started.
    #[error("failed to start audio pipeline: {0}")]
    Pipeline(#[from] std::io::Error),

    /// A session was handed a voice channel that belongs to another guild.
    #[error("session for guild {session} was given a channel in guild {channel_guild}")]
    CrossGuildMisuse {
        session: GuildId,
        channel_guild: GuildId,
    },

    #[error("voice transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl MusicError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Whether the error should be shown to the user who issued the command.
    ///
    /// `CrossGuildMisuse` is a programming error and only gets logged.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::CrossGuildMisuse { .. })
    }

    /// Network, auth and process-spawn failures, as opposed to bad track data.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Http(_) | Self::Pipeline(_)
        )
    }
}

/// Errors raised while demuxing, decoding or re-encoding Opus packets.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ogg container error: {0}")]
    Container(String),

    #[error("opus codec error: {0}")]
    Codec(#[from] audiopus::Error),
}

impl From<AudioError> for std::io::Error {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Io(io) => io,
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_guild_misuse_is_not_user_facing() {
        let err = MusicError::CrossGuildMisuse {
            session: GuildId::new(1),
            channel_guild: GuildId::new(2),
        };
        assert!(!err.is_user_facing());
        assert!(MusicError::InvalidTrack("x".into()).is_user_facing());
    }

    #[test]
    fn provider_classification() {
        assert!(MusicError::provider("spotify", "401").is_provider_error());
        assert!(!MusicError::InvalidTrack("empty search".into()).is_provider_error());
    }
}
