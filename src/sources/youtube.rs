use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::{path::PathBuf, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{AudioProvider, Platform, Track, VideoDetails};
use crate::{
    audio::{
        packet_source::PacketSource,
        transmux::{forward_stderr, Transmuxer},
        volume::Volume,
    },
    error::{MusicError, Result},
};

const PROVIDER: &str = "yt-dlp";

/// Fields printed by yt-dlp before the download starts, one per line.
const PRINTED_FIELDS: [&str; 9] = [
    "id",
    "title",
    "thumbnail",
    "upload_date",
    "duration",
    "view_count",
    "uploader",
    "channel_url",
    "channel_follower_count",
];

/// Verifica si una referencia apunta a YouTube
pub fn is_youtube_reference(reference: &str) -> bool {
    Url::parse(reference.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
        })
}

/// Información impresa por yt-dlp
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrintedInfo {
    video_id: String,
    title: String,
    thumbnail: String,
    uploaded_at: i64,
    duration: u64,
    view_count: u64,
    uploader: String,
    channel_url: String,
    subscribers: u64,
}

impl PrintedInfo {
    /// Missing or garbled numbers fall back to zero.
    fn from_lines(lines: &[String]) -> Self {
        let field = |i: usize| lines.get(i).map(|s| s.trim()).unwrap_or_default();
        let number = |i: usize| field(i).parse::<u64>().unwrap_or(0);

        let duration = field(4)
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.ceil() as u64)
            .unwrap_or(0);
        let uploaded_at = NaiveDate::parse_from_str(field(3), "%Y%m%d")
            .map(|day| day.and_time(NaiveTime::MIN).and_utc().timestamp())
            .unwrap_or(0);

        Self {
            video_id: field(0).to_string(),
            title: field(1).to_string(),
            thumbnail: field(2).to_string(),
            uploaded_at,
            duration,
            view_count: number(5),
            uploader: field(6).to_string(),
            channel_url: field(7).to_string(),
            subscribers: number(8),
        }
    }

    fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// Proveedor de audio basado en yt-dlp: busca, descarga y transmuxea en un
/// solo pipeline.
pub struct YtDlpProvider {
    ytdlp: PathBuf,
    transmuxer: Transmuxer,
    volume: Volume,
}

impl YtDlpProvider {
    pub fn new(ytdlp: impl Into<PathBuf>, transmuxer: Transmuxer, volume: Volume) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            transmuxer,
            volume,
        }
    }

    fn args(query: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(PRINTED_FIELDS.len() * 2 + 8);
        for field in PRINTED_FIELDS {
            args.push("--print".to_string());
            args.push(format!("before_dl:{field}"));
        }
        args.extend(
            [
                "--no-simulate",
                "--default-search",
                "ytsearch",
                "--format",
                "bestaudio/best",
                query,
                "-o",
                "-",
            ]
            .map(String::from),
        );
        args
    }
}

#[async_trait]
impl AudioProvider for YtDlpProvider {
    async fn fetch(&self, query: &str) -> Result<Track> {
        info!("🔍 Buscando en YouTube: {}", query);

        let mut child = Command::new(&self.ytdlp)
            .args(Self::args(query))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MusicError::provider(PROVIDER, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MusicError::provider(PROVIDER, "stderr was not captured"))?;

        // yt-dlp writes the audio straight into ffmpeg
        let audio: Stdio = stdout.try_into()?;
        let stream = self.transmuxer.transmux(audio)?.adopt(child);

        let mut lines = BufReader::new(stderr).lines();
        let mut printed = Vec::with_capacity(PRINTED_FIELDS.len());
        while printed.len() < PRINTED_FIELDS.len() {
            match lines.next_line().await? {
                Some(line) if line.starts_with("WARNING:") => warn!("[yt-dlp] {}", line),
                Some(line) if line.starts_with("ERROR:") => {
                    return Err(MusicError::provider(PROVIDER, line));
                }
                Some(line) => printed.push(line),
                None => {
                    return Err(MusicError::provider(
                        PROVIDER,
                        format!("exited after printing {} of 9 fields", printed.len()),
                    ));
                }
            }
        }
        forward_stderr("yt-dlp", lines.into_inner());

        let info = PrintedInfo::from_lines(&printed);
        if info.video_id.is_empty() {
            return Err(MusicError::InvalidTrack(format!(
                "no YouTube result for `{query}`"
            )));
        }
        debug!("🎬 yt-dlp encontró {} ({})", info.title, info.video_id);

        let source = PacketSource::from_transmux(stream, self.volume.clone())?.into_shared();
        Ok(Track {
            url: info.watch_url(),
            title: info.title,
            artist: info.uploader,
            artist_url: info.channel_url,
            image_url: info.thumbnail,
            duration: info.duration,
            platform: Platform::YouTube(VideoDetails {
                video_id: info.video_id,
                view_count: info.view_count,
                uploaded_at: info.uploaded_at,
                subscribers: info.subscribers,
            }),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_youtube_references() {
        assert!(is_youtube_reference("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_reference("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_reference("https://music.youtube.com/watch?v=abc"));
        assert!(!is_youtube_reference("https://open.spotify.com/track/abc123"));
        assert!(!is_youtube_reference("never gonna give you up"));
        assert!(!is_youtube_reference("https://notyoutube.com/watch?v=abc"));
    }

    #[test]
    fn arguments_print_metadata_and_stream_to_stdout() {
        let args = YtDlpProvider::args("some song");
        assert_eq!(args[0], "--print");
        assert_eq!(args[1], "before_dl:id");
        assert_eq!(args[17], "before_dl:channel_follower_count");
        let tail = &args[args.len() - 3..];
        assert_eq!(tail, ["some song", "-o", "-"]);
        assert!(args.join(" ").contains("--default-search ytsearch"));
    }

    #[test]
    fn parses_printed_fields() {
        let info = PrintedInfo::from_lines(&lines(&[
            "dQw4w9WgXcQ",
            "Never Gonna Give You Up",
            "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "20091025",
            "212.4",
            "1500000000",
            "Rick Astley",
            "https://www.youtube.com/channel/UCuAXFkgsw1L7xaCfnd5JJOw",
            "4100000",
        ]));

        assert_eq!(info.duration, 213);
        assert_eq!(info.uploaded_at, 1_256_428_800);
        assert_eq!(info.view_count, 1_500_000_000);
        assert_eq!(info.subscribers, 4_100_000);
        assert_eq!(info.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn garbled_fields_fall_back_to_zero() {
        let info = PrintedInfo::from_lines(&lines(&[
            "id", "title", "thumb", "NA", "NA", "NA", "uploader", "url", "NA",
        ]));
        assert_eq!(
            (info.uploaded_at, info.duration, info.view_count, info.subscribers),
            (0, 0, 0, 0)
        );
        assert_eq!(info.title, "title");
    }
}
