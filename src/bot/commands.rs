use anyhow::Result;
use serenity::{
    builder::{
        CreateAutocompleteResponse, CreateCommand, CreateCommandOption, CreateInteractionResponse,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, CommandOptionType},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{reply::FollowupSink, JukeboxBot};
use crate::{
    audio::{queue::NoticeKind, session::VoiceChannel},
    sources::SourceChoice,
    ui::embeds,
};

/// Discord limita el autocompletado a 25 opciones de hasta 100 caracteres
const MAX_AUTOCOMPLETE_CHOICES: usize = 25;
const MAX_CHOICE_LENGTH: usize = 100;

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        stop_command(),
        volume_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "song",
                "URL de Spotify/YouTube o término de búsqueda",
            )
            .required(true)
            .set_autocomplete(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "platform", "Fuente de búsqueda")
                .add_string_choice("Spotify", "spotify")
                .add_string_choice("YouTube", "youtube"),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volumen (0-200)")
                .min_int_value(0)
                .max_int_value(200),
        )
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, guild_id, bot).await?,
        "skip" => handle_skip(ctx, &command, guild_id, bot).await?,
        "stop" => handle_stop(ctx, &command, guild_id, bot).await?,
        "volume" => handle_volume(ctx, &command, bot).await?,
        _ => {
            respond(
                ctx,
                &command,
                embeds::create_error_embed("Comando desconocido", "❌ Comando no reconocido"),
            )
            .await?;
        }
    }

    Ok(())
}

/// Sugerencias para la opción `song` de `/play`
pub async fn handle_autocomplete(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let Some(focused) = command.data.autocomplete() else {
        return Ok(());
    };

    let query = focused.value.trim();
    let mut response = CreateAutocompleteResponse::new();

    // URLs y búsquedas directas en YouTube se reproducen tal cual
    let wants_spotify = string_option(&command, "platform")
        .and_then(SourceChoice::parse)
        .unwrap_or_default()
        == SourceChoice::Spotify;

    if wants_spotify && !query.is_empty() && !query.starts_with("http") {
        match bot.resolver.search(query).await {
            Ok(results) => {
                for metadata in results.into_iter().take(MAX_AUTOCOMPLETE_CHOICES) {
                    let label = format!("{} · {}", metadata.title, metadata.artist_name);
                    response = response
                        .add_string_choice(truncate(&label, MAX_CHOICE_LENGTH), metadata.url);
                }
            }
            Err(e) => warn!("⚠️ Autocompletado falló para '{}': {}", query, e),
        }
    }

    command
        .create_response(&ctx.http, CreateInteractionResponse::Autocomplete(response))
        .await?;

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let song = string_option(&command, "song")
        .ok_or_else(|| anyhow::anyhow!("Canción no proporcionada"))?
        .to_string();
    let choice = string_option(&command, "platform")
        .and_then(SourceChoice::parse)
        .unwrap_or_default();

    // Defer la respuesta ya que puede tomar tiempo
    command.defer(&ctx.http).await?;

    let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        edit_error(ctx, &command, "Sin canal de voz", "Debes estar en un canal de voz").await?;
        return Ok(());
    };

    let track = match bot.resolver.fetch_from(&song, choice).await {
        Ok(track) => track,
        Err(e) if e.is_user_facing() => {
            warn!("⚠️ No se pudo resolver '{}': {}", song, e);
            let title = if e.is_provider_error() {
                "Servicio no disponible"
            } else {
                "No se pudo reproducir"
            };
            edit_error(ctx, &command, title, &e.to_string()).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let session = bot.registry.get_or_create(guild_id);
    let sink = Arc::new(FollowupSink::new(ctx.http.clone(), command.clone()));
    let channel = VoiceChannel {
        guild_id,
        channel_id,
    };

    if let Err(e) = session
        .play_or_queue(track, channel, command.user.id, sink)
        .await
    {
        edit_error(ctx, &command, "Error de conexión", &e.to_string()).await?;
        return Err(e.into());
    }

    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let skipped = match bot.registry.get(guild_id) {
        Some(session) => session.skip_current_song().await,
        None => None,
    };

    let embed = match skipped {
        Some(entry) => embeds::create_notice_embed(&entry.notice(NoticeKind::Skipped)),
        None => embeds::create_info_embed("Nada que saltar", "No hay nada reproduciéndose"),
    };
    respond(ctx, command, embed).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let stopped = match bot.registry.get(guild_id) {
        Some(session) => session.stop().await,
        None => None,
    };

    let embed = match stopped {
        Some(entry) => embeds::create_notice_embed(&entry.notice(NoticeKind::Stopped)),
        None => embeds::create_info_embed("Nada que detener", "No hay nada reproduciéndose"),
    };
    respond(ctx, command, embed).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64());

    let volume = match level {
        Some(percent) => bot.volume.set(percent as f32 / 100.0),
        None => bot.volume.get(),
    };

    let mut playing = None;
    if let Some(session) = command.guild_id.and_then(|id| bot.registry.get(id)) {
        if let Some(entry) = session.now_playing().await {
            // queue_len incluye la cabeza
            let waiting = session.queue_len().await.saturating_sub(1);
            playing = Some((entry.track.title, waiting));
        }
    }

    let embed = embeds::create_volume_embed(
        volume,
        playing.as_ref().map(|(title, waiting)| (title.as_str(), *waiting)),
    );
    respond(ctx, command, embed).await
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: serenity::builder::CreateEmbed,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn edit_error(
    ctx: &Context,
    command: &CommandInteraction,
    title: &str,
    description: &str,
) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embeds::create_error_embed(title, description)),
        )
        .await?;
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_labels_are_cut_to_the_discord_limit() {
        let label = "a".repeat(150);
        let cut = truncate(&label, MAX_CHOICE_LENGTH);
        assert_eq!(cut.chars().count(), MAX_CHOICE_LENGTH);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("corto", MAX_CHOICE_LENGTH), "corto");
    }

    #[test]
    fn registers_the_four_commands() {
        let names: Vec<String> = all_commands()
            .into_iter()
            .map(|command| serde_json::to_value(command).unwrap()["name"].to_string())
            .collect();
        assert_eq!(names, ["\"play\"", "\"skip\"", "\"stop\"", "\"volume\""]);
    }
}
