// Embeds and text for protection announcements and status.

use crate::core::protection::{ProtectionTriggered, ProtectionType, RaidStatus, SpamStatus};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

// Discord caps an embed field at 1024 characters.
const MAX_FIELD_LEN: usize = 1024;

/// Mentions for a member list, cut off before the field limit.
pub fn format_member_list(members: &[u64]) -> String {
    if members.is_empty() {
        return "None".to_string();
    }

    let mut out = String::new();
    for (shown, id) in members.iter().enumerate() {
        let mention = format!("<@{}>", id);
        let suffix = format!("\n…and {} more", members.len() - shown);
        if out.len() + mention.len() + 1 + suffix.len() > MAX_FIELD_LEN {
            out.push_str(&suffix);
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&mention);
    }
    out
}

pub fn format_trigger_title(event: &ProtectionTriggered) -> String {
    match event.kind {
        ProtectionType::Raid => "🛡️ Raid Detected".to_string(),
        ProtectionType::Spam => "🛡️ Spam Detected".to_string(),
    }
}

pub fn format_trigger_event(event: &ProtectionTriggered) -> CreateEmbed {
    let punished = event.affected_members.len() - event.failed_members.len();
    let mut embed = CreateEmbed::default()
        .title(format_trigger_title(event))
        .description(format!(
            "{} punished **{}** member{} with **{}**.",
            event.kind,
            punished,
            if punished == 1 { "" } else { "s" },
            event.action
        ))
        .color(serenity::Color::RED)
        .field("Members", format_member_list(&event.affected_members), false)
        .footer(CreateEmbedFooter::new(format!("Guild ID: {}", event.guild_id)));

    if let Ok(timestamp) = serenity::Timestamp::from_unix_timestamp(event.triggered_at.timestamp()) {
        embed = embed.timestamp(timestamp);
    }

    if !event.failed_members.is_empty() {
        embed = embed.field(
            "Could not punish",
            format_member_list(&event.failed_members),
            false,
        );
    }
    embed
}

pub fn format_duration(minutes: u32) -> String {
    match minutes {
        0 => "permanent".to_string(),
        m if m % 60 == 0 => format!("{}h", m / 60),
        m => format!("{}m", m),
    }
}

pub fn format_raid_status(raid: &RaidStatus) -> String {
    format!(
        "**{}** joins within **{}s** → {} ({})\nPending joins: {}",
        raid.policy.join_threshold,
        raid.policy.window_seconds,
        raid.policy.action,
        format_duration(raid.policy.punish_duration_minutes),
        raid.pending_count
    )
}

pub fn format_spam_status(spam: &SpamStatus) -> String {
    let ignored = if spam.policy.ignored_channels.is_empty() {
        "none".to_string()
    } else {
        spam.policy
            .ignored_channels
            .iter()
            .map(|id| format!("<#{}>", id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let role = spam
        .policy
        .role_id
        .map(|id| format!(" <@&{}>", id))
        .unwrap_or_default();

    format!(
        "**{}** messages in a row → {}{} ({})\nIgnored channels: {}\nUsers being watched: {}",
        spam.policy.message_threshold,
        spam.policy.action,
        role,
        format_duration(spam.policy.mute_duration_minutes),
        ignored,
        spam.tracked_users
    )
}

pub fn format_status(
    guild_id: u64,
    spam: Option<&SpamStatus>,
    raid: Option<&RaidStatus>,
) -> CreateEmbed {
    let raid_text = raid
        .map(format_raid_status)
        .unwrap_or_else(|| "❌ Disabled".to_string());
    let spam_text = spam
        .map(format_spam_status)
        .unwrap_or_else(|| "❌ Disabled".to_string());

    CreateEmbed::default()
        .title("🛡️ Protection Status")
        .color(serenity::Color::BLURPLE)
        .field("Anti-Raid", raid_text, false)
        .field("Anti-Spam", spam_text, false)
        .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
        .timestamp(serenity::Timestamp::now())
}
