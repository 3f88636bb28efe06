use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serenity::{
    builder::{CreateInteractionResponseFollowup, EditInteractionResponse},
    http::Http,
    model::application::CommandInteraction,
};
use tracing::{debug, error};

use crate::{
    audio::queue::{PlaybackNotice, ReplySink},
    ui::embeds,
};

/// Sends playback notices back through the `/play` interaction that queued
/// the track. The first notice fills the deferred response; later ones are
/// follow-ups.
pub struct FollowupSink {
    http: Arc<Http>,
    interaction: CommandInteraction,
    answered: AtomicBool,
}

impl FollowupSink {
    pub fn new(http: Arc<Http>, interaction: CommandInteraction) -> Self {
        Self {
            http,
            interaction,
            answered: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReplySink for FollowupSink {
    async fn send(&self, notice: PlaybackNotice) {
        let embed = embeds::create_notice_embed(&notice);

        let result = if self.answered.swap(true, Ordering::AcqRel) {
            self.interaction
                .create_followup(
                    &self.http,
                    CreateInteractionResponseFollowup::new().embed(embed),
                )
                .await
        } else {
            self.interaction
                .edit_response(&self.http, EditInteractionResponse::new().embed(embed))
                .await
        };

        match result {
            Ok(_) => debug!("📨 Aviso {:?} enviado a {}", notice.kind, notice.guild_id),
            // interaction tokens expire after 15 minutes
            Err(e) => error!("❌ No se pudo enviar aviso a {}: {:?}", notice.guild_id, e),
        }
    }
}
