// Discord-side punishments - applies core punishment requests through the
// Discord HTTP API and keeps a mute role ready for mute-capable policies.
//
// Timed punishments are reverted by a sleeping task. Those tasks live in
// memory only, so a restart drops any pending revert.

use crate::core::protection::{
    MuteRoleResolver, ProtectionError, PunishmentAction, PunishmentExecutor, PunishmentRequest,
};
use async_trait::async_trait;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Name of the role used to chat-mute members.
pub const MUTE_ROLE_NAME: &str = "guild-guard-mute";

// Days of message history removed with a protection ban.
const BAN_PRUNE_DAYS: u8 = 7;

#[derive(Clone)]
pub struct DiscordPunisher {
    http: Arc<serenity::Http>,
    /// guild_id -> mute role id
    mute_roles: Arc<DashMap<u64, u64>>,
}

impl DiscordPunisher {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self {
            http,
            mute_roles: Arc::new(DashMap::new()),
        }
    }

    async fn find_mute_role(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<Option<serenity::RoleId>, serenity::Error> {
        let roles = guild_id.roles(&self.http).await?;
        Ok(roles
            .values()
            .find(|role| role.name == MUTE_ROLE_NAME)
            .map(|role| role.id))
    }

    /// Create the mute role and deny it speech in every channel.
    async fn create_mute_role(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<serenity::RoleId, serenity::Error> {
        let role = guild_id
            .create_role(
                &self.http,
                serenity::EditRole::new()
                    .name(MUTE_ROLE_NAME)
                    .permissions(serenity::Permissions::empty())
                    .audit_log_reason("Mute role for anti-raid / anti-spam"),
            )
            .await?;

        let overwrite = serenity::PermissionOverwrite {
            allow: serenity::Permissions::empty(),
            deny: serenity::Permissions::SEND_MESSAGES
                | serenity::Permissions::SEND_MESSAGES_IN_THREADS
                | serenity::Permissions::ADD_REACTIONS
                | serenity::Permissions::SPEAK,
            kind: serenity::PermissionOverwriteType::Role(role.id),
        };

        for channel in guild_id.channels(&self.http).await?.values() {
            if let Err(e) = channel.create_permission(&self.http, overwrite.clone()).await {
                tracing::warn!(
                    guild_id = guild_id.get(),
                    channel_id = channel.id.get(),
                    "Failed to set mute role overwrite: {}",
                    e
                );
            }
        }

        tracing::info!(guild_id = guild_id.get(), role_id = role.id.get(), "Created mute role");
        Ok(role.id)
    }

    async fn mute_role(&self, guild_id: u64) -> Result<serenity::RoleId, serenity::Error> {
        if let Some(role_id) = self.mute_roles.get(&guild_id) {
            return Ok(serenity::RoleId::new(*role_id));
        }

        let guild = serenity::GuildId::new(guild_id);
        let role_id = match self.find_mute_role(guild).await? {
            Some(role_id) => role_id,
            None => self.create_mute_role(guild).await?,
        };
        self.mute_roles.insert(guild_id, role_id.get());
        Ok(role_id)
    }

    async fn apply(&self, request: &PunishmentRequest) -> Result<(), serenity::Error> {
        let guild_id = serenity::GuildId::new(request.guild_id);
        let user_id = serenity::UserId::new(request.member_id);
        let reason = request.reason.as_str();

        match request.action {
            PunishmentAction::Mute => {
                let role_id = self.mute_role(request.guild_id).await?;
                self.http
                    .add_member_role(guild_id, user_id, role_id, Some(reason))
                    .await?;
                // Members outside voice can't be server-muted; the role still applies.
                if let Err(e) = self.set_voice_mute(guild_id, user_id, true, reason).await {
                    tracing::debug!(member_id = request.member_id, "Voice mute skipped: {}", e);
                }
            }
            PunishmentAction::ChatMute => {
                let role_id = self.mute_role(request.guild_id).await?;
                self.http
                    .add_member_role(guild_id, user_id, role_id, Some(reason))
                    .await?;
            }
            PunishmentAction::VoiceMute => {
                self.set_voice_mute(guild_id, user_id, true, reason).await?;
            }
            PunishmentAction::Kick => {
                guild_id.kick_with_reason(&self.http, user_id, reason).await?;
            }
            PunishmentAction::Ban => {
                guild_id
                    .ban_with_reason(&self.http, user_id, BAN_PRUNE_DAYS, reason)
                    .await?;
            }
            PunishmentAction::AddRole => {
                if let Some(role_id) = request.role_id {
                    self.http
                        .add_member_role(
                            guild_id,
                            user_id,
                            serenity::RoleId::new(role_id),
                            Some(reason),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn set_voice_mute(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        muted: bool,
        reason: &str,
    ) -> Result<(), serenity::Error> {
        guild_id
            .edit_member(
                &self.http,
                user_id,
                serenity::EditMember::new()
                    .mute(muted)
                    .audit_log_reason(reason),
            )
            .await?;
        Ok(())
    }

    /// Undo a timed punishment.
    async fn revert(&self, request: &PunishmentRequest) -> Result<(), serenity::Error> {
        let guild_id = serenity::GuildId::new(request.guild_id);
        let user_id = serenity::UserId::new(request.member_id);
        let reason = "Timed protection punishment expired";

        match request.action {
            PunishmentAction::Mute | PunishmentAction::ChatMute => {
                let role_id = self.mute_role(request.guild_id).await?;
                self.http
                    .remove_member_role(guild_id, user_id, role_id, Some(reason))
                    .await?;
                if request.action == PunishmentAction::Mute {
                    if let Err(e) = self.set_voice_mute(guild_id, user_id, false, reason).await {
                        tracing::debug!(member_id = request.member_id, "Voice unmute skipped: {}", e);
                    }
                }
            }
            PunishmentAction::VoiceMute => {
                self.set_voice_mute(guild_id, user_id, false, reason).await?;
            }
            PunishmentAction::Ban => {
                guild_id.unban(&self.http, user_id).await?;
            }
            PunishmentAction::AddRole => {
                if let Some(role_id) = request.role_id {
                    self.http
                        .remove_member_role(
                            guild_id,
                            user_id,
                            serenity::RoleId::new(role_id),
                            Some(reason),
                        )
                        .await?;
                }
            }
            PunishmentAction::Kick => {}
        }
        Ok(())
    }

    fn schedule_revert(&self, request: PunishmentRequest) {
        let punisher = self.clone();
        let delay = Duration::from_secs(u64::from(request.duration_minutes) * 60);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match punisher.revert(&request).await {
                Ok(()) => tracing::info!(
                    guild_id = request.guild_id,
                    member_id = request.member_id,
                    action = %request.action,
                    "Timed punishment reverted"
                ),
                Err(e) => tracing::warn!(
                    guild_id = request.guild_id,
                    member_id = request.member_id,
                    action = %request.action,
                    "Failed to revert timed punishment: {}",
                    e
                ),
            }
        });
    }
}

#[async_trait]
impl PunishmentExecutor for DiscordPunisher {
    async fn apply_punishment(&self, request: PunishmentRequest) -> Result<(), ProtectionError> {
        self.apply(&request)
            .await
            .map_err(|e| ProtectionError::Executor(e.to_string()))?;

        tracing::info!(
            guild_id = request.guild_id,
            member_id = request.member_id,
            action = %request.action,
            minutes = request.duration_minutes,
            "Punishment applied"
        );

        if request.duration_minutes > 0 && request.action.is_duration_allowed() {
            self.schedule_revert(request);
        }
        Ok(())
    }
}

#[async_trait]
impl MuteRoleResolver for DiscordPunisher {
    async fn ensure_mute_role(&self, guild_id: u64) -> Result<u64, ProtectionError> {
        self.mute_role(guild_id)
            .await
            .map(|role_id| role_id.get())
            .map_err(|e| ProtectionError::MuteRole(e.to_string()))
    }
}
