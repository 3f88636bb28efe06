//! # Bot Module
//!
//! Discord front end: slash commands, autocomplete and voice-state tracking
//! on top of the per-guild playback sessions.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`] and owns:
//!
//! - the [`SessionRegistry`] with one playback session per guild
//! - the [`TrackResolver`] used by `/play` and its autocomplete
//! - the shared [`Volume`] applied to every packet source
//!
//! Registering commands and starting the maintenance loop happen on `ready`.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod reply;

use crate::{
    audio::{registry::SessionRegistry, session::SessionStatus, volume::Volume},
    config::Config,
    sources::TrackResolver,
};

pub struct JukeboxBot {
    config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub resolver: Arc<TrackResolver>,
    pub volume: Volume,
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(
        config: Config,
        registry: Arc<SessionRegistry>,
        resolver: Arc<TrackResolver>,
        volume: Volume,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            resolver,
            volume,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registers slash commands for the dev guild when one is configured,
    /// globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

/// Non-bot members in each of `channels`, read from the guild cache.
fn count_listeners(
    ctx: &Context,
    guild_id: GuildId,
    channels: &HashSet<ChannelId>,
) -> Vec<(ChannelId, usize)> {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Vec::new();
    };

    channels
        .iter()
        .map(|&channel_id| {
            let listeners = guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel_id))
                .filter(|state| {
                    let is_bot = state
                        .member
                        .as_ref()
                        .map(|member| member.user.bot)
                        .or_else(|| ctx.cache.user(state.user_id).map(|user| user.bot))
                        .unwrap_or(false);
                    !is_bot
                })
                .count();
            (channel_id, listeners)
        })
        .collect()
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // ready fires again on every reconnect
        if self.maintenance_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let config = self.config.clone();
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();

        tokio::spawn(async move {
            maintenance_tasks(config, registry, resolver).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = commands::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Autocomplete(command) => {
                if let Err(e) = commands::handle_autocomplete(&ctx, command, self).await {
                    error!("Error en autocompletado: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Forwards membership changes to the guild's session and detects when
    /// the bot itself was disconnected.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };

        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id {
            if new.channel_id.is_none() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                let left = old.and_then(|state| state.channel_id);
                session.transport_disconnected(left).await;
            }
            return;
        }

        // nothing to stop while detached
        if session.status().await == SessionStatus::Idle {
            return;
        }

        let channels: HashSet<ChannelId> = old
            .as_ref()
            .and_then(|state| state.channel_id)
            .into_iter()
            .chain(new.channel_id)
            .collect();

        for (channel_id, listeners) in count_listeners(&ctx, guild_id, &channels) {
            debug!(
                "👥 Canal {} en {} tiene {} oyentes",
                channel_id, guild_id, listeners
            );
            session.on_listeners_changed(channel_id, listeners).await;
        }
    }
}

/// Periodic housekeeping: expired metadata and long-idle sessions.
async fn maintenance_tasks(
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    resolver: Arc<TrackResolver>,
) {
    let mut interval = tokio::time::interval(config.maintenance_interval());
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        resolver.cache().cleanup_old_entries();
        registry.evict_idle(config.session_idle_eviction());

        debug!(
            "🧹 Tareas de mantenimiento completadas ({} sesiones activas)",
            registry.len()
        );
    }
}
