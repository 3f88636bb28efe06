pub mod resolver;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    audio::packet_source::SharedPacketSource,
    error::{MusicError, Result},
};

pub use resolver::{SourceChoice, TrackResolver};
pub use spotify::{SpotifyClient, SpotifyTrack};
pub use youtube::YtDlpProvider;

/// Datos del video de YouTube que respalda un track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub video_id: String,
    pub view_count: u64,
    /// Unix timestamp, 0 when unknown.
    pub uploaded_at: i64,
    pub subscribers: u64,
}

/// Plataforma de la que proviene un track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    YouTube(VideoDetails),
    Spotify {
        track_id: String,
        /// Unix timestamp of the album release.
        released_at: i64,
        /// The video actually streamed for this track.
        video: VideoDetails,
    },
}

impl Platform {
    pub fn color(&self) -> u32 {
        match self {
            Self::YouTube(_) => 0xEC3718,
            Self::Spotify { .. } => 0x1DB954,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::YouTube(_) => "YouTube",
            Self::Spotify { .. } => "Spotify",
        }
    }

    pub fn video(&self) -> &VideoDetails {
        match self {
            Self::YouTube(video) | Self::Spotify { video, .. } => video,
        }
    }
}

/// A resolved, playable track. Never modified once built.
#[derive(Clone)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub artist_url: String,
    pub url: String,
    pub image_url: String,
    /// Seconds.
    pub duration: u64,
    pub platform: Platform,
    pub source: SharedPacketSource,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("url", &self.url)
            .field("duration", &self.duration)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl Track {
    pub fn color(&self) -> u32 {
        self.platform.color()
    }

    /// Waits for the first audio packet so process startup latency is paid
    /// before playback begins. Runs on the blocking pool.
    pub async fn preload(&self) -> Result<()> {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || source.lock().preload())
            .await
            .map_err(|e| MusicError::Transport(format!("preload task failed: {e}")))??;
        Ok(())
    }
}

/// Metadatos normalizados de un track de Spotify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Query handed to the audio provider, e.g. `"Song" by A and B`.
    pub search_term: String,
    pub title: String,
    pub track_id: String,
    pub url: String,
    pub image_url: Option<String>,
    pub artist_name: String,
    pub artist_url: String,
    pub released_at: i64,
}

/// Catálogo de metadatos (Spotify)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Looks up a track by its platform ID.
    async fn track(&self, track_id: &str) -> Result<SpotifyTrack>;

    /// Free-text search, at most `limit` raw candidates.
    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<SpotifyTrack>>;
}

/// Fuente de audio reproducible (YouTube vía yt-dlp)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioProvider: Send + Sync {
    /// Finds the best match for `query` (a URL or search text) and starts
    /// streaming it.
    async fn fetch(&self, query: &str) -> Result<Track>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::audio::{
        packet_source::{
            tests::{ogg_stream, opus_packets},
            PacketSource,
        },
        volume::Volume,
    };

    /// A YouTube track backed by a short in-memory Ogg/Opus stream.
    pub(crate) fn fixture_track(title: &str) -> Track {
        let bytes = ogg_stream(&opus_packets(3));
        let source = PacketSource::new(Cursor::new(bytes), Volume::default())
            .unwrap()
            .into_shared();
        Track {
            title: title.to_string(),
            artist: "Uploader".to_string(),
            artist_url: "https://www.youtube.com/channel/UC123".to_string(),
            url: format!("https://www.youtube.com/watch?v={title}"),
            image_url: "https://i.ytimg.com/vi/x/hq.jpg".to_string(),
            duration: 180,
            platform: Platform::YouTube(VideoDetails {
                video_id: title.to_string(),
                view_count: 1_000,
                uploaded_at: 0,
                subscribers: 10,
            }),
            source,
        }
    }

    #[test]
    fn platform_colors() {
        let video = VideoDetails::default();
        assert_eq!(Platform::YouTube(video.clone()).color(), 0xEC3718);
        let spotify = Platform::Spotify {
            track_id: "abc".into(),
            released_at: 0,
            video,
        };
        assert_eq!(spotify.color(), 0x1DB954);
        assert_eq!(spotify.name(), "Spotify");
    }

    #[tokio::test]
    async fn preload_reads_the_first_packet() {
        let track = fixture_track("x");
        track.preload().await.unwrap();
        let first = track.source.lock().read().unwrap();
        assert!(first.starts_with(b"OpusHead"));
    }
}
