// Entry point of the guild protection bot.
//
// **Architecture Overview:**
// - `core/` = Detection and punishment logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (commands, events, punisher)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Route gateway events into the protection engine

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::protection::{ProtectionService, ProtectionSettings};
use crate::discord::protection::announcer::spawn_announcer;
use crate::discord::protection::events as protection_events;
use crate::discord::protection::punisher::DiscordPunisher;
use crate::discord::{Data, Error};
use crate::infra::protection::SqliteProtectionStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "data/protection.db";

/// Read an integer setting from the environment, falling back on a default.
fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn load_settings() -> ProtectionSettings {
    let defaults = ProtectionSettings::default();
    ProtectionSettings {
        spam_idle_window: Duration::from_secs(env_u64(
            "PROTECTION_SPAM_IDLE_SECS",
            defaults.spam_idle_window.as_secs(),
        )),
        punishment_spacing: Duration::from_millis(env_u64(
            "PROTECTION_PUNISH_SPACING_MS",
            defaults.punishment_spacing.as_millis() as u64,
        )),
    }
}

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            protection_events::handle_message(data, new_message);
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            protection_events::handle_member_join(data, new_member);
        }
        serenity::FullEvent::GuildCreate { guild, .. } => {
            protection_events::handle_guild_create(data, guild).await;
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            protection_events::handle_guild_delete(data, incomplete).await;
        }
        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );
    let db_path =
        std::env::var("PROTECTION_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let settings = load_settings();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    // Policies survive restarts; detector state does not.
    let store = SqliteProtectionStore::new(&db_path)
        .await
        .expect("Failed to initialize protection database");

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    // GUILD_MEMBERS is privileged and must be enabled in the developer portal.
    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::protection::commands::antiraid(),
                discord::protection::commands::antiraid_off(),
                discord::protection::commands::antispam(),
                discord::protection::commands::antispam_off(),
                discord::protection::commands::antispam_ignore(),
                discord::protection::commands::antilist(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up as {}", ready.user.name);

                // The punisher needs the live HTTP client, so the service is
                // wired here instead of before the client exists.
                let punisher = DiscordPunisher::new(ctx.http.clone());
                let protection = Arc::new(ProtectionService::new(
                    store,
                    punisher.clone(),
                    punisher,
                    ready.user.id.get(),
                    settings,
                ));

                match protection.restore_all().await {
                    Ok(armed) => tracing::info!(armed, "Restored protection policies"),
                    Err(e) => tracing::error!("Failed to restore protection policies: {}", e),
                }

                spawn_announcer(ctx.http.clone(), protection.subscribe());

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered, bot is ready");

                Ok(Data { protection })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
