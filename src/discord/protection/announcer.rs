// Posts an announcement for every finished protection batch.

use super::formatter::format_trigger_event;
use crate::core::protection::ProtectionTriggered;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Listen for protection batches and announce them in each guild's system channel.
pub fn spawn_announcer(
    http: Arc<serenity::Http>,
    mut events: broadcast::Receiver<ProtectionTriggered>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = announce(&http, &event).await {
                        tracing::warn!(
                            guild_id = event.guild_id,
                            error = %e,
                            "Failed to announce protection trigger"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Announcer fell behind, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn announce(
    http: &serenity::Http,
    event: &ProtectionTriggered,
) -> Result<(), serenity::Error> {
    let guild = serenity::GuildId::new(event.guild_id)
        .to_partial_guild(http)
        .await?;

    let Some(channel_id) = guild.system_channel_id else {
        tracing::debug!(guild_id = event.guild_id, "No system channel to announce in");
        return Ok(());
    };

    channel_id
        .send_message(
            http,
            serenity::CreateMessage::new().embed(format_trigger_event(event)),
        )
        .await?;
    Ok(())
}
