// Discord layer - commands, event handlers and the platform adapters.

#[path = "protection/mod.rs"]
pub mod protection;

use crate::core::protection::ProtectionService;
use crate::infra::protection::SqliteProtectionStore;
use protection::punisher::DiscordPunisher;
use std::sync::Arc;

pub type Protection = ProtectionService<SqliteProtectionStore, DiscordPunisher, DiscordPunisher>;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub protection: Arc<Protection>,
}
