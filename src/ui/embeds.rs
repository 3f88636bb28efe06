use num_format::{Locale, ToFormattedString};
use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::queue::{NoticeKind, PlaybackNotice},
    sources::{Platform, Track},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Jukebox";

fn notice_title(kind: &NoticeKind) -> String {
    match kind {
        NoticeKind::NowPlaying => "🎵 Reproduciendo Ahora".to_string(),
        NoticeKind::Queued { position } => format!("📋 En cola (#{position})"),
        NoticeKind::Skipped => "⏭️ Canción saltada".to_string(),
        NoticeKind::Stopped => "⏹️ Reproducción detenida".to_string(),
        NoticeKind::Failed { .. } => "⚠️ Falló la reproducción, saltando".to_string(),
    }
}

/// Un embed por notificación de reproducción
pub fn create_notice_embed(notice: &PlaybackNotice) -> CreateEmbed {
    let track = &notice.track;
    let mut embed = track_embed(track)
        .title(format!("{}: {}", notice_title(&notice.kind), track.title))
        .field("👤 Solicitado por", format!("<@{}>", notice.requester), true)
        .field("🔈 Canal", format!("<#{}>", notice.channel_id), true);

    if let NoticeKind::Failed { reason } = &notice.kind {
        embed = embed
            .description(format!("```{reason}```"))
            .color(colors::ERROR_RED);
    }

    embed
}

/// Campos comunes de un track, con el color de su plataforma
fn track_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .url(&track.url)
        .color(Colour::new(track.color()))
        .field(
            "🎤 Artista",
            format!("[{}]({})", track.artist, track.artist_url),
            true,
        )
        .field("⏱️ Duración", format_duration(track.duration), true);

    match &track.platform {
        Platform::YouTube(video) => {
            embed = embed
                .field("👁️ Vistas", format_count(video.view_count), true)
                .field("📣 Suscriptores", format_count(video.subscribers), true);
            if video.uploaded_at > 0 {
                embed = embed.field("📅 Subido", discord_date(video.uploaded_at), true);
            }
        }
        Platform::Spotify {
            released_at, video, ..
        } => {
            embed = embed
                .field("📅 Lanzamiento", discord_date(*released_at), true)
                .field("👁️ Vistas en YouTube", format_count(video.view_count), true);
        }
    }

    if !track.image_url.is_empty() {
        embed = embed.thumbnail(&track.image_url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "{} · {}",
            STANDARD_FOOTER,
            track.platform.name()
        )))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual y, si hay sesión activa,
/// la canción actual y cuántas esperan en cola
pub fn create_volume_embed(volume: f32, playing: Option<(&str, usize)>) -> CreateEmbed {
    let percent = (volume * 100.0).round() as u32;
    let status_emoji = match percent {
        0 => "🔇",
        1..=50 => "🔉",
        _ => "🔊",
    };

    let mut embed = CreateEmbed::default()
        .title(format!("{} Control de Volumen", status_emoji))
        .description(format!("**Volumen actual: {}%**", percent))
        .field("📊 Nivel", create_volume_bar(volume), false);

    if let Some((title, waiting)) = playing {
        embed = embed
            .field("🎵 Sonando", title, true)
            .field("📋 En cola", waiting.to_string(), true);
    }

    embed
        .color(if percent == 0 {
            colors::WARNING_ORANGE
        } else {
            colors::INFO_BLUE
        })
        .footer(CreateEmbedFooter::new("💡 Afecta a todas las sesiones activas"))
        .timestamp(Timestamp::now())
}

/// Barra de 20 segmentos, 100% a la mitad
fn create_volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume / 2.0) * segments as f32).round().clamp(0.0, segments as f32) as usize;
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]`", bar)
}

fn discord_date(timestamp: i64) -> String {
    format!("<t:{timestamp}:D> (<t:{timestamp}:R>)")
}

fn format_count(value: u64) -> String {
    value.to_formatted_string(&Locale::en)
}

/// Formatea segundos como `m:ss` o `h:mm:ss`
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
