//! Cliente de la Web API de Spotify (client credentials).

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{MetadataProvider, TrackMetadata};
use crate::error::{MusicError, Result};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PROVIDER: &str = "spotify";

/// Tokens are refreshed this long before Spotify says they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

static TRACK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"spotify\.com/track/(\w+)").expect("valid track id pattern"));

/// Extracts the track ID from a `open.spotify.com/track/<id>` reference.
pub fn extract_track_id(reference: &str) -> Option<&str> {
    TRACK_ID_REGEX
        .captures(reference)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// Respuestas de la API. Every field is optional so that a malformed record
// can be rejected with a precise message instead of a parse failure.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyArtist {
    pub name: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyImage {
    pub url: String,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyAlbum {
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyTrack {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbum>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<SearchPage>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Option<SpotifyTrack>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() {
                return Ok(current.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MusicError::provider(
                PROVIDER,
                format!("token request rejected with {}", response.status()),
            ));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_MARGIN);
        *token = Some(AccessToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!("🔑 Token de Spotify renovado");
        Ok(body.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(|e| {
                MusicError::InvalidTrack(format!("Spotify returned unexpected JSON: {e}"))
            }),
            status @ (StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) => Err(
                MusicError::InvalidTrack(format!("Spotify rejected the request ({status})")),
            ),
            StatusCode::UNAUTHORIZED => {
                self.token.lock().await.take();
                Err(MusicError::provider(PROVIDER, "access token was rejected"))
            }
            status => Err(MusicError::provider(PROVIDER, format!("status {status}"))),
        }
    }
}

#[async_trait]
impl MetadataProvider for SpotifyClient {
    async fn track(&self, track_id: &str) -> Result<SpotifyTrack> {
        debug!("📊 Consultando track de Spotify {}", track_id);
        self.get(&format!("/tracks/{track_id}"), &[]).await
    }

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<SpotifyTrack>> {
        info!("🔍 Buscando en Spotify: {}", query);
        let response: SearchResponse = self
            .get(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "track".to_string()),
                    ("limit", limit.clamp(1, 50).to_string()),
                ],
            )
            .await?;

        Ok(response
            .tracks
            .map(|page| page.items.into_iter().flatten().collect())
            .unwrap_or_default())
    }
}

/// Formats artist names as "A", "A and B" or "A, B, and C".
pub fn format_artists(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => (*one).to_string(),
        [first, second] => format!("{first} and {second}"),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

/// Parses `YYYY-MM-DD`, `YYYY-MM` or `YYYY` into a UTC midnight timestamp.
fn parse_release_date(date: &str) -> Option<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{date}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{date}-01-01"), "%Y-%m-%d"))
        .ok()?;
    Some(day.and_time(NaiveTime::MIN).and_utc().timestamp())
}

fn missing(field: &str) -> MusicError {
    MusicError::InvalidTrack(format!("Spotify track is missing `{field}`"))
}

impl TryFrom<SpotifyTrack> for TrackMetadata {
    type Error = MusicError;

    fn try_from(track: SpotifyTrack) -> Result<Self> {
        let track_id = track.id.ok_or_else(|| missing("id"))?;
        let title = track.name.ok_or_else(|| missing("name"))?;
        let url = track.external_urls.spotify.ok_or_else(|| missing("external_urls"))?;

        let primary = track.artists.first().ok_or_else(|| missing("artists"))?;
        let artist_name = primary.name.clone().ok_or_else(|| missing("artists.name"))?;
        let artist_url = primary
            .external_urls
            .spotify
            .clone()
            .ok_or_else(|| missing("artists.external_urls"))?;

        let album = track.album.ok_or_else(|| missing("album"))?;
        let release_date = album.release_date.ok_or_else(|| missing("album.release_date"))?;
        let released_at = parse_release_date(&release_date).ok_or_else(|| {
            MusicError::InvalidTrack(format!("unrecognised release date `{release_date}`"))
        })?;
        let image_url = album
            .images
            .into_iter()
            .max_by_key(|image| image.height.unwrap_or(0))
            .map(|image| image.url);

        let names: Vec<&str> = track
            .artists
            .iter()
            .filter_map(|artist| artist.name.as_deref())
            .collect();
        let search_term = format!("\"{}\" by {}", title, format_artists(&names));

        Ok(Self {
            search_term,
            title,
            track_id,
            url,
            image_url,
            artist_name,
            artist_url,
            released_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A well-formed API record with the given artists.
    pub(crate) fn raw_track(id: &str, title: &str, artists: &[&str]) -> SpotifyTrack {
        SpotifyTrack {
            id: Some(id.to_string()),
            name: Some(title.to_string()),
            artists: artists
                .iter()
                .map(|name| SpotifyArtist {
                    name: Some(name.to_string()),
                    external_urls: ExternalUrls {
                        spotify: Some(format!("https://open.spotify.com/artist/{name}")),
                    },
                })
                .collect(),
            album: Some(SpotifyAlbum {
                images: vec![
                    SpotifyImage {
                        url: "small.jpg".into(),
                        height: Some(64),
                    },
                    SpotifyImage {
                        url: "large.jpg".into(),
                        height: Some(640),
                    },
                ],
                release_date: Some("1983-01-04".into()),
            }),
            external_urls: ExternalUrls {
                spotify: Some(format!("https://open.spotify.com/track/{id}")),
            },
        }
    }

    #[test]
    fn extracts_track_id_from_urls() {
        assert_eq!(
            extract_track_id("https://open.spotify.com/track/1TfqLAPs4K3s2rJMoCokcS?si=4e23cbac"),
            Some("1TfqLAPs4K3s2rJMoCokcS")
        );
        assert_eq!(extract_track_id("https://open.spotify.com/track/abc123"), Some("abc123"));
        assert_eq!(extract_track_id("never gonna give you up"), None);
        assert_eq!(extract_track_id("https://open.spotify.com/album/abc123"), None);
    }

    #[test]
    fn artist_list_formatting() {
        assert_eq!(format_artists(&["A"]), "A");
        assert_eq!(format_artists(&["A", "B"]), "A and B");
        assert_eq!(format_artists(&["A", "B", "C"]), "A, B, and C");
        assert_eq!(format_artists(&["A", "B", "C", "D"]), "A, B, C, and D");
    }

    #[test]
    fn normalizes_a_well_formed_track() {
        let meta = TrackMetadata::try_from(raw_track(
            "1TfqLAPs4K3s2rJMoCokcS",
            "Sweet Dreams",
            &["Eurythmics", "Annie Lennox", "Dave Stewart"],
        ))
        .unwrap();

        assert_eq!(
            meta.search_term,
            "\"Sweet Dreams\" by Eurythmics, Annie Lennox, and Dave Stewart"
        );
        assert_eq!(meta.artist_name, "Eurythmics");
        assert_eq!(meta.image_url.as_deref(), Some("large.jpg"));
        assert_eq!(meta.released_at, 410_486_400);
    }

    #[test]
    fn release_date_precisions() {
        assert_eq!(parse_release_date("1970-01-02"), Some(86_400));
        assert_eq!(parse_release_date("1970-02"), Some(31 * 86_400));
        assert_eq!(parse_release_date("1971"), Some(365 * 86_400));
        assert_eq!(parse_release_date("soon"), None);
    }

    #[test]
    fn missing_fields_are_invalid_tracks() {
        let mut no_artists = raw_track("a", "t", &["x"]);
        no_artists.artists.clear();
        assert!(matches!(
            TrackMetadata::try_from(no_artists),
            Err(MusicError::InvalidTrack(_))
        ));

        let mut no_album = raw_track("a", "t", &["x"]);
        no_album.album = None;
        assert!(TrackMetadata::try_from(no_album).is_err());

        let mut no_images = raw_track("a", "t", &["x"]);
        if let Some(album) = no_images.album.as_mut() {
            album.images.clear();
        }
        assert_eq!(TrackMetadata::try_from(no_images).unwrap().image_url, None);
    }

    #[test]
    fn search_response_skips_null_items() {
        let json = r#"{"tracks":{"items":[null,{"id":"a","name":"t","artists":[]}]}}"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let items: Vec<SpotifyTrack> = response
            .tracks
            .map(|page| page.items.into_iter().flatten().collect())
            .unwrap_or_default();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("a"));
    }
}
