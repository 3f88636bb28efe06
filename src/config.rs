use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Spotify
    pub spotify_client_id: String,
    pub spotify_client_secret: String,

    // Audio
    pub default_volume: f32,

    // Cache de metadatos
    pub metadata_cache_size: usize,
    pub metadata_cache_ttl: u64, // En segundos
    pub search_page_size: usize,

    // Binarios externos
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,

    // Mantenimiento
    pub session_idle_eviction: u64, // En segundos
    pub maintenance_interval: u64,  // En segundos
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración desde cualquier fuente clave/valor
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Falta la variable de entorno {key}"))
        };
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: required("DISCORD_TOKEN")?,
            application_id: required("APPLICATION_ID")?
                .parse()
                .context("APPLICATION_ID debe ser numérico")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            // Spotify
            spotify_client_id: required("SPOTIFY_CLIENT_ID")?,
            spotify_client_secret: required("SPOTIFY_CLIENT_SECRET")?,

            // Audio
            default_volume: parse_or(&lookup, "DEFAULT_VOLUME", defaults.default_volume)?,

            // Cache
            metadata_cache_size: parse_or(
                &lookup,
                "METADATA_CACHE_SIZE",
                defaults.metadata_cache_size,
            )?,
            metadata_cache_ttl: parse_or(&lookup, "METADATA_CACHE_TTL", defaults.metadata_cache_ttl)?,
            search_page_size: parse_or(&lookup, "SEARCH_PAGE_SIZE", defaults.search_page_size)?,

            // Binarios externos
            ytdlp_path: lookup("YTDLP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: lookup("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),

            // Mantenimiento
            session_idle_eviction: parse_or(
                &lookup,
                "SESSION_IDLE_EVICTION",
                defaults.session_idle_eviction,
            )?,
            maintenance_interval: parse_or(
                &lookup,
                "MAINTENANCE_INTERVAL",
                defaults.maintenance_interval,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Valida que los valores de configuración sean correctos
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "El volumen por defecto debe estar entre 0.0 y 2.0, recibido: {}",
                self.default_volume
            );
        }

        if self.metadata_cache_size == 0 {
            anyhow::bail!("El tamaño del cache de metadatos debe ser mayor que 0");
        }

        if self.metadata_cache_ttl == 0 {
            anyhow::bail!("El TTL del cache de metadatos debe ser mayor que 0");
        }

        // Spotify limita las búsquedas a 50 resultados por página
        if !(1..=50).contains(&self.search_page_size) {
            anyhow::bail!(
                "El tamaño de página de búsqueda debe estar entre 1 y 50, recibido: {}",
                self.search_page_size
            );
        }

        if self.maintenance_interval == 0 {
            anyhow::bail!("El intervalo de mantenimiento debe ser mayor que 0");
        }

        Ok(())
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl)
    }

    pub fn session_idle_eviction(&self) -> Duration {
        Duration::from_secs(self.session_idle_eviction)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval)
    }

    /// Resumen de la configuración para logs, sin credenciales
    pub fn summary(&self) -> String {
        format!(
            "Resumen de configuración:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol\n  \
            Cache: {} entradas de metadatos, TTL {}\n  \
            Búsqueda: {} resultados por página\n  \
            Binarios: {} / {}\n  \
            Mantenimiento: cada {}, sesiones inactivas descartadas tras {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.metadata_cache_size,
            humantime::format_duration(self.metadata_cache_ttl()),
            self.search_page_size,
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
            humantime::format_duration(self.maintenance_interval()),
            humantime::format_duration(self.session_idle_eviction()),
        )
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: {value}")),
        _ => Ok(default),
    }
}

/// Valores por defecto de la configuración.
///
/// Se usan cuando las variables de entorno no están definidas.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valores por defecto, son obligatorios)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),

            default_volume: 1.0,

            metadata_cache_size: 100,
            metadata_cache_ttl: 15 * 60,
            search_page_size: 10,

            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),

            session_idle_eviction: 60 * 60,
            maintenance_interval: 5 * 60,
        }
    }
}
