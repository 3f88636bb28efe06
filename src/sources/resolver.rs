//! Resolución de referencias de canciones a tracks reproducibles.

use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};

use super::{
    spotify::extract_track_id, youtube::is_youtube_reference, AudioProvider, MetadataProvider,
    Platform, Track, TrackMetadata,
};
use crate::{
    cache::MetadataCache,
    error::{MusicError, Result},
};

/// Where a free-text reference should be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceChoice {
    #[default]
    Spotify,
    YouTube,
}

impl SourceChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "spotify" => Some(Self::Spotify),
            "youtube" => Some(Self::YouTube),
            _ => None,
        }
    }
}

/// Lowercased, trimmed, single-spaced form used to compare search terms.
fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct TrackResolver {
    metadata: Arc<dyn MetadataProvider>,
    audio: Arc<dyn AudioProvider>,
    cache: MetadataCache,
    page_size: usize,
}

impl TrackResolver {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        audio: Arc<dyn AudioProvider>,
        cache: MetadataCache,
        page_size: usize,
    ) -> Self {
        Self {
            metadata,
            audio,
            cache,
            page_size: page_size.max(1),
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Cache first, then the metadata API.
    pub async fn resolve_by_id(&self, track_id: &str) -> Result<TrackMetadata> {
        if let Some(cached) = self.cache.get(&track_id.to_string()) {
            debug!("💾 Cache hit para track {}", track_id);
            return Ok(cached);
        }

        debug!("Cache miss para track {}", track_id);
        let raw = self.metadata.track(track_id).await?;
        let meta = TrackMetadata::try_from(raw)?;
        self.cache.insert(meta.track_id.clone(), meta.clone());
        Ok(meta)
    }

    /// Remote search, deduplicated by search term and by track ID in
    /// first-seen order. Every accepted candidate is cached.
    pub async fn search(&self, query: &str) -> Result<Vec<TrackMetadata>> {
        let raw = self.metadata.search_tracks(query, self.page_size).await?;

        let mut seen_terms = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut results = Vec::new();

        for candidate in raw {
            let meta = match TrackMetadata::try_from(candidate) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Candidato descartado: {}", e);
                    continue;
                }
            };

            let term = normalize_term(&meta.search_term);
            if seen_terms.contains(&term) || seen_ids.contains(&meta.track_id) {
                continue;
            }
            seen_terms.insert(term);
            seen_ids.insert(meta.track_id.clone());

            self.cache.insert(meta.track_id.clone(), meta.clone());
            results.push(meta);
            if results.len() == self.page_size {
                break;
            }
        }

        debug!("🔍 {} resultados únicos para '{}'", results.len(), query);
        Ok(results)
    }

    pub async fn resolve_by_query(&self, query: &str) -> Result<TrackMetadata> {
        self.search(query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::InvalidTrack(format!("no results for `{query}`")))
    }

    /// Resolves a Spotify URL or search text into a playable track.
    pub async fn fetch(&self, reference: &str) -> Result<Track> {
        let meta = match extract_track_id(reference) {
            Some(track_id) => self.resolve_by_id(track_id).await?,
            None => self.resolve_by_query(reference).await?,
        };

        info!("🎯 Resuelto '{}' como {}", reference, meta.search_term);
        let audio = self.audio.fetch(&meta.search_term).await?;
        Ok(merge(meta, audio))
    }

    /// Routes YouTube links and the YouTube choice straight to the audio
    /// provider; everything else goes through [`fetch`](Self::fetch).
    pub async fn fetch_from(&self, reference: &str, choice: SourceChoice) -> Result<Track> {
        if choice == SourceChoice::YouTube || is_youtube_reference(reference) {
            return self.audio.fetch(reference).await;
        }
        self.fetch(reference).await
    }
}

/// Display fields from the metadata platform, stream and duration from the
/// audio platform.
fn merge(meta: TrackMetadata, audio: Track) -> Track {
    let video = audio.platform.video().clone();
    Track {
        title: meta.title,
        artist: meta.artist_name,
        artist_url: meta.artist_url,
        url: meta.url,
        image_url: meta.image_url.unwrap_or(audio.image_url),
        duration: audio.duration,
        platform: Platform::Spotify {
            track_id: meta.track_id,
            released_at: meta.released_at,
            video,
        },
        source: audio.source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    use crate::{
        audio::{
            queue::{tests::RecordingSink, NoticeKind},
            session::{PlaybackSession, SessionStatus, VoiceChannel},
            transport::fake::FakeConnector,
        },
        sources::{
            spotify::tests::raw_track, tests::fixture_track, MockAudioProvider,
            MockMetadataProvider,
        },
    };
    use serenity::model::id::{ChannelId, GuildId, UserId};

    fn resolver(metadata: MockMetadataProvider, audio: MockAudioProvider) -> TrackResolver {
        TrackResolver::new(
            Arc::new(metadata),
            Arc::new(audio),
            MetadataCache::new(100, Duration::from_secs(900)),
            10,
        )
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_hits_the_cache() {
        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_track()
            .withf(|id| id == "abc123")
            .times(1)
            .returning(|_| Ok(raw_track("abc123", "X", &["Y"])));

        let resolver = resolver(metadata, MockAudioProvider::new());
        let first = resolver.resolve_by_id("abc123").await.unwrap();
        let second = resolver.resolve_by_id("abc123").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn malformed_track_is_invalid() {
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_track().returning(|_| {
            let mut raw = raw_track("abc123", "X", &["Y"]);
            raw.name = None;
            Ok(raw)
        });

        let resolver = resolver(metadata, MockAudioProvider::new());
        let err = resolver.resolve_by_id("abc123").await.unwrap_err();
        assert!(matches!(err, MusicError::InvalidTrack(_)));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn search_dedups_by_term_and_id_in_first_seen_order() {
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_search_tracks().returning(|_, _| {
            Ok(vec![
                raw_track("1", "Song", &["A"]),
                // same search term, different id
                raw_track("2", "SONG", &["a"]),
                // same id, different term
                raw_track("1", "Other", &["B"]),
                raw_track("3", "Third", &["C"]),
            ])
        });

        let resolver = resolver(metadata, MockAudioProvider::new());
        let ids: Vec<String> = resolver
            .search("song")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.track_id)
            .collect();

        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(resolver.cache().len(), 2);
    }

    #[tokio::test]
    async fn search_results_feed_the_id_cache() {
        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_search_tracks()
            .returning(|_, _| Ok(vec![raw_track("42", "Cached", &["A"])]));
        metadata.expect_track().times(0);

        let resolver = resolver(metadata, MockAudioProvider::new());
        resolver.search("cached").await.unwrap();
        assert_eq!(resolver.resolve_by_id("42").await.unwrap().title, "Cached");
    }

    #[tokio::test]
    async fn empty_search_is_an_invalid_track() {
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_search_tracks().returning(|_, _| Ok(Vec::new()));

        let resolver = resolver(metadata, MockAudioProvider::new());
        let err = resolver.resolve_by_query("nothing").await.unwrap_err();
        assert!(matches!(err, MusicError::InvalidTrack(_)));
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_search_tracks()
            .returning(|_, _| Err(MusicError::provider("spotify", "status 503")));

        let resolver = resolver(metadata, MockAudioProvider::new());
        let err = resolver.fetch("some song").await.unwrap_err();
        assert!(err.is_provider_error());
    }

    #[tokio::test]
    async fn youtube_choice_bypasses_metadata() {
        let mut audio = MockAudioProvider::new();
        audio
            .expect_fetch()
            .withf(|q| q == "https://youtu.be/dQw4w9WgXcQ")
            .times(1)
            .returning(|_| Ok(fixture_track("dQw4w9WgXcQ")));

        let resolver = resolver(MockMetadataProvider::new(), audio);
        let track = resolver
            .fetch_from("https://youtu.be/dQw4w9WgXcQ", SourceChoice::Spotify)
            .await
            .unwrap();
        assert!(matches!(track.platform, Platform::YouTube(_)));
    }

    #[tokio::test]
    async fn missing_artwork_falls_back_to_the_video_thumbnail() {
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_track().returning(|_| {
            let mut raw = raw_track("abc123", "X", &["Y"]);
            if let Some(album) = raw.album.as_mut() {
                album.images.clear();
            }
            Ok(raw)
        });
        let mut audio = MockAudioProvider::new();
        audio.expect_fetch().returning(|_| Ok(fixture_track("vid")));

        let resolver = resolver(metadata, audio);
        let track = resolver
            .fetch("https://open.spotify.com/track/abc123")
            .await
            .unwrap();
        assert_eq!(track.image_url, "https://i.ytimg.com/vi/x/hq.jpg");
    }

    #[tokio::test]
    async fn spotify_url_resolves_and_plays_end_to_end() {
        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_track()
            .withf(|id| id == "abc123")
            .times(1)
            .returning(|_| Ok(raw_track("abc123", "X", &["Y"])));
        let mut audio = MockAudioProvider::new();
        audio
            .expect_fetch()
            .withf(|q| q == "\"X\" by Y")
            .times(1)
            .returning(|_| Ok(fixture_track("video")));

        let resolver = resolver(metadata, audio);
        let track = resolver
            .fetch("https://open.spotify.com/track/abc123")
            .await
            .unwrap();

        assert_eq!(track.title, "X");
        assert_eq!(track.artist, "Y");
        assert_eq!(track.duration, 180);
        assert_eq!(track.image_url, "large.jpg");
        assert!(matches!(
            &track.platform,
            Platform::Spotify { track_id, video, .. }
                if track_id == "abc123" && video.video_id == "video"
        ));

        let guild = GuildId::new(7);
        let connector = Arc::new(FakeConnector::default());
        let session = PlaybackSession::new(guild, connector.clone());
        let sink = Arc::new(RecordingSink::default());
        session
            .play_or_queue(
                track,
                VoiceChannel {
                    guild_id: guild,
                    channel_id: ChannelId::new(70),
                },
                UserId::new(1),
                sink.clone(),
            )
            .await
            .unwrap();

        assert_eq!(session.status().await, SessionStatus::Playing);
        assert_eq!(connector.handle().unwrap().play_count(), 1);
        assert_eq!(sink.kinds(), vec![NoticeKind::NowPlaying]);
    }

    #[test]
    fn normalizes_terms_and_choices() {
        assert_eq!(normalize_term("  \"X\"   by  Y "), "\"x\" by y");
        assert_eq!(SourceChoice::parse("YouTube"), Some(SourceChoice::YouTube));
        assert_eq!(SourceChoice::parse("tidal"), None);
    }
}
