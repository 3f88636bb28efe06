use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{path::Path, sync::Arc};
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{
    registry::SessionRegistry, songbird_transport::SongbirdConnector, transmux::Transmuxer,
    volume::Volume,
};
use crate::bot::JukeboxBot;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::sources::{SpotifyClient, TrackResolver, YtDlpProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config.ytdlp_path, &config.ffmpeg_path).await;
    }

    // Audio compartido por todas las sesiones
    let volume = Volume::new(config.default_volume);
    let transmuxer = Transmuxer::new(config.ffmpeg_path.clone());
    let audio = Arc::new(YtDlpProvider::new(
        config.ytdlp_path.clone(),
        transmuxer,
        volume.clone(),
    ));

    // Metadatos
    let spotify = Arc::new(SpotifyClient::new(
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
    ));
    let cache = MetadataCache::new(config.metadata_cache_size, config.metadata_cache_ttl());
    let resolver = Arc::new(TrackResolver::new(
        spotify,
        audio,
        cache,
        config.search_page_size,
    ));

    // Voz
    let songbird = Songbird::serenity();
    let registry = Arc::new(SessionRegistry::new(Arc::new(SongbirdConnector::new(
        songbird.clone(),
    ))));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), registry, resolver, volume);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(ytdlp: &Path, ffmpeg: &Path) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(ytdlp)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(ffmpeg)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
