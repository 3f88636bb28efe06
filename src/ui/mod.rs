//! Embeds que el bot envía a Discord.

pub mod embeds;
