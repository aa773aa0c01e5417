// Gateway events -> protection engine.
//
// Pulls the primitive IDs out of serenity types and hands them to core.
// Nothing here waits on Discord; punishment batches run on their own tasks.

use crate::core::protection::{GuildMessage, MemberJoin};
use crate::discord::Data;
use poise::serenity_prelude as serenity;

pub fn handle_member_join(data: &Data, member: &serenity::Member) {
    let join = MemberJoin {
        guild_id: member.guild_id.get(),
        member_id: member.user.id.get(),
        is_bot: member.user.bot,
    };
    data.protection.handle_member_join(join);
}

pub fn handle_message(data: &Data, message: &serenity::Message) {
    // DMs have no guild and are never protected.
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let message = GuildMessage {
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        author_id: message.author.id.get(),
        is_bot: message.author.bot,
    };
    data.protection.handle_message(message);
}

pub async fn handle_guild_create(data: &Data, guild: &serenity::Guild) {
    data.protection.guild_available(guild.id.get()).await;
}

pub async fn handle_guild_delete(data: &Data, incomplete: &serenity::UnavailableGuild) {
    // `unavailable` means a Discord outage, not that we left.
    if incomplete.unavailable {
        tracing::debug!(guild_id = incomplete.id.get(), "Guild became unavailable");
        return;
    }
    data.protection.guild_left(incomplete.id.get()).await;
}
