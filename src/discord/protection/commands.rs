// Anti-raid / anti-spam slash commands.

use super::formatter::{format_raid_status, format_spam_status, format_status};
use crate::core::protection::{ProtectionError, PunishmentAction};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ActionChoice {
    #[name = "Mute (chat + voice)"]
    Mute,
    #[name = "Chat Mute"]
    ChatMute,
    #[name = "Voice Mute"]
    VoiceMute,
    #[name = "Kick"]
    Kick,
    #[name = "Ban"]
    Ban,
    #[name = "Add Role"]
    AddRole,
}

impl From<ActionChoice> for PunishmentAction {
    fn from(choice: ActionChoice) -> Self {
        match choice {
            ActionChoice::Mute => PunishmentAction::Mute,
            ActionChoice::ChatMute => PunishmentAction::ChatMute,
            ActionChoice::VoiceMute => PunishmentAction::VoiceMute,
            ActionChoice::Kick => PunishmentAction::Kick,
            ActionChoice::Ban => PunishmentAction::Ban,
            ActionChoice::AddRole => PunishmentAction::AddRole,
        }
    }
}

/// Bad settings go back to the admin as a reply; anything else is a real error.
async fn reply_or_fail(ctx: Context<'_>, err: ProtectionError) -> Result<(), Error> {
    if err.is_configuration() {
        ctx.send(
            poise::CreateReply::default()
                .content(format!("❌ {}", err))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }
    Err(err.into())
}

/// Punish members when too many join in a short time.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antiraid(
    ctx: Context<'_>,
    #[description = "Number of joins that counts as a raid"]
    #[min = 2]
    #[max = 30]
    users: u32,
    #[description = "Time window in seconds"]
    #[min = 2]
    #[max = 300]
    seconds: u32,
    #[description = "Punishment for raiders"] action: ActionChoice,
    #[description = "Punishment length in minutes (0 = permanent)"]
    #[max = 1440]
    minutes: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    let action = PunishmentAction::from(action);

    let result = ctx
        .data()
        .protection
        .start_anti_raid(guild_id, users, seconds, action, minutes.unwrap_or(0))
        .await;

    match result {
        Ok(status) => {
            let embed = serenity::CreateEmbed::new()
                .title("🛡️ Anti-Raid Enabled")
                .color(serenity::Color::DARK_GREEN)
                .description(format_raid_status(&status));
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
            Ok(())
        }
        Err(e) => reply_or_fail(ctx, e).await,
    }
}

/// Turn anti-raid protection off.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antiraid_off(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();

    if ctx.data().protection.stop_anti_raid(guild_id).await? {
        ctx.say("❌ Anti-raid protection has been **disabled**.").await?;
    } else {
        ctx.say("Anti-raid protection is not enabled.").await?;
    }
    Ok(())
}

/// Punish members who send too many messages in a row.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antispam(
    ctx: Context<'_>,
    #[description = "Consecutive messages that count as spam"]
    #[min = 2]
    #[max = 10]
    messages: u32,
    #[description = "Punishment for spammers"] action: ActionChoice,
    #[description = "Punishment length in minutes (0 = permanent)"]
    #[max = 1440]
    minutes: Option<u32>,
    #[description = "Role to give (only for Add Role)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    let action = PunishmentAction::from(action);
    let role_id = role.map(|r| r.id.get());

    let result = ctx
        .data()
        .protection
        .start_anti_spam(guild_id, messages, action, minutes.unwrap_or(0), role_id)
        .await;

    match result {
        Ok(status) => {
            let embed = serenity::CreateEmbed::new()
                .title("🛡️ Anti-Spam Enabled")
                .color(serenity::Color::DARK_GREEN)
                .description(format_spam_status(&status));
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
            Ok(())
        }
        Err(e) => reply_or_fail(ctx, e).await,
    }
}

/// Turn anti-spam protection off.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antispam_off(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();

    if ctx.data().protection.stop_anti_spam(guild_id).await? {
        ctx.say("❌ Anti-spam protection has been **disabled**.").await?;
    } else {
        ctx.say("Anti-spam protection is not enabled.").await?;
    }
    Ok(())
}

/// Toggle whether anti-spam watches a channel.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antispam_ignore(
    ctx: Context<'_>,
    #[description = "Channel to ignore or watch again"] channel: serenity::Channel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    let channel_id = channel.id();

    let reply = match ctx
        .data()
        .protection
        .toggle_channel_ignore(guild_id, channel_id.get())
        .await?
    {
        Some(true) => format!("Anti-spam will now **ignore** <#{}>.", channel_id),
        Some(false) => format!("Anti-spam will **watch** <#{}> again.", channel_id),
        None => "Anti-spam is not enabled. Use `/antispam` first.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show which protections are running.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn antilist(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();

    let (spam, raid) = ctx.data().protection.get_status(guild_id);
    if spam.is_none() && raid.is_none() {
        ctx.say("No protection is enabled.").await?;
        return Ok(());
    }

    let embed = format_status(guild_id, spam.as_ref(), raid.as_ref());
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choices_map_to_actions() {
        assert_eq!(PunishmentAction::from(ActionChoice::Mute), PunishmentAction::Mute);
        assert_eq!(
            PunishmentAction::from(ActionChoice::ChatMute),
            PunishmentAction::ChatMute
        );
        assert_eq!(
            PunishmentAction::from(ActionChoice::AddRole),
            PunishmentAction::AddRole
        );
    }
}
