// Owner of all runtime protection state.
//
// One optional RaidDetector and one optional SpamDetector per guild, each
// behind an Arc. Reconfiguring a guild builds a fresh detector and swaps the
// Arc into the map in one insert, so an event handler holding the old Arc
// finishes against a consistent policy. Replaced detectors are retired so
// they stop producing triggers.
//
// Config writes for a guild are serialized by a per-guild async lock because
// the store works on whole-guild read-modify-write. Leaving a guild takes the
// same lock and marks the guild as departed, so a config call that was already
// in flight can't re-arm it afterwards.

use super::protection_models::{
    GuildProtectionConfig, ProtectionSettings, RaidPolicy, RaidStatus, SpamPolicy, SpamStatus,
};
use super::protection_ports::{MuteRoleResolver, ProtectionError, ProtectionStore};
use super::raid_detector::RaidDetector;
use super::spam_detector::SpamDetector;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ProtectionRegistry<S: ProtectionStore, M: MuteRoleResolver> {
    store: S,
    mute_roles: M,
    settings: ProtectionSettings,
    raid: DashMap<u64, Arc<RaidDetector>>,
    spam: DashMap<u64, Arc<SpamDetector>>,
    config_locks: DashMap<u64, Arc<Mutex<()>>>,
    /// Guilds the bot left. Only cleared when the guild becomes available again.
    departed: DashSet<u64>,
}

impl<S: ProtectionStore, M: MuteRoleResolver> ProtectionRegistry<S, M> {
    pub fn new(store: S, mute_roles: M, settings: ProtectionSettings) -> Self {
        Self {
            store,
            mute_roles,
            settings,
            raid: DashMap::new(),
            spam: DashMap::new(),
            config_locks: DashMap::new(),
            departed: DashSet::new(),
        }
    }

    fn config_lock(&self, guild_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(&self.config_locks.entry(guild_id).or_default())
    }

    // ------------------------------------------------------------------------
    // Raid
    // ------------------------------------------------------------------------

    /// Validate, persist, then arm a fresh raid detector for the guild.
    pub async fn start_raid_protection(
        &self,
        guild_id: u64,
        policy: RaidPolicy,
    ) -> Result<RaidStatus, ProtectionError> {
        let policy = policy.normalized()?;
        if policy.action.requires_mute_role() {
            self.mute_roles.ensure_mute_role(guild_id).await?;
        }

        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        let mut config = self.store.load_config(guild_id).await?;
        config.raid = Some(policy.clone());
        self.store.save_config(guild_id, &config).await?;

        let detector = Arc::new(RaidDetector::new(guild_id, policy));
        let status = detector.status();
        if self.departed.contains(&guild_id) {
            tracing::warn!(guild_id, "Raid policy saved for a departed guild, not arming");
            return Ok(status);
        }
        if let Some(previous) = self.raid.insert(guild_id, detector) {
            previous.retire();
        }

        tracing::info!(
            guild_id,
            threshold = status.policy.join_threshold,
            window_secs = status.policy.window_seconds,
            action = %status.policy.action,
            "Raid protection started"
        );
        Ok(status)
    }

    /// Disarm and forget the guild's raid policy. Returns whether one existed.
    pub async fn stop_raid_protection(&self, guild_id: u64) -> Result<bool, ProtectionError> {
        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        // Storage first: if the write fails the detector stays armed.
        let mut config = self.store.load_config(guild_id).await?;
        let persisted = config.raid.take().is_some();
        if persisted {
            self.store.save_config(guild_id, &config).await?;
        }

        let removed = self.raid.remove(&guild_id);
        if let Some((_, detector)) = &removed {
            detector.retire();
        }

        let existed = removed.is_some() || persisted;
        if existed {
            tracing::info!(guild_id, "Raid protection stopped");
        }
        Ok(existed)
    }

    pub fn raid_detector(&self, guild_id: u64) -> Option<Arc<RaidDetector>> {
        self.raid.get(&guild_id).map(|detector| Arc::clone(&detector))
    }

    // ------------------------------------------------------------------------
    // Spam
    // ------------------------------------------------------------------------

    /// Validate, persist, then arm a fresh spam detector for the guild.
    ///
    /// With `keep_ignored`, the guild's current ignored channels carry over
    /// into the new policy instead of the ones on `policy`.
    pub async fn start_spam_protection(
        &self,
        guild_id: u64,
        policy: SpamPolicy,
        keep_ignored: bool,
    ) -> Result<SpamStatus, ProtectionError> {
        let mut policy = policy.normalized()?;
        if policy.action.requires_mute_role() {
            self.mute_roles.ensure_mute_role(guild_id).await?;
        }

        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        let mut config = self.store.load_config(guild_id).await?;
        if keep_ignored {
            policy.ignored_channels = match self.spam_detector(guild_id) {
                Some(current) => current.ignored_channels().into_iter().collect(),
                None => config
                    .spam
                    .as_ref()
                    .map(|stored| stored.ignored_channels.clone())
                    .unwrap_or_default(),
            };
        }
        config.spam = Some(policy.clone());
        self.store.save_config(guild_id, &config).await?;

        let detector = Arc::new(SpamDetector::new(
            guild_id,
            policy,
            self.settings.spam_idle_window,
        ));
        let status = detector.status();
        if self.departed.contains(&guild_id) {
            tracing::warn!(guild_id, "Spam policy saved for a departed guild, not arming");
            return Ok(status);
        }
        if let Some(previous) = self.spam.insert(guild_id, detector) {
            previous.retire();
        }

        tracing::info!(
            guild_id,
            threshold = status.policy.message_threshold,
            action = %status.policy.action,
            ignored = status.policy.ignored_channels.len(),
            "Spam protection started"
        );
        Ok(status)
    }

    /// Disarm and forget the guild's spam policy. Returns whether one existed.
    pub async fn stop_spam_protection(&self, guild_id: u64) -> Result<bool, ProtectionError> {
        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        // Storage first: if the write fails the detector stays armed.
        let mut config = self.store.load_config(guild_id).await?;
        let persisted = config.spam.take().is_some();
        if persisted {
            self.store.save_config(guild_id, &config).await?;
        }

        let removed = self.spam.remove(&guild_id);
        if let Some((_, detector)) = &removed {
            detector.retire();
        }

        let existed = removed.is_some() || persisted;
        if existed {
            tracing::info!(guild_id, "Spam protection stopped");
        }
        Ok(existed)
    }

    /// Flip a channel on the spam ignore list.
    ///
    /// `None` if the guild has no spam protection, otherwise whether the
    /// channel is ignored after the call.
    pub async fn toggle_channel_ignore(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Option<bool>, ProtectionError> {
        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        let Some(detector) = self.spam_detector(guild_id) else {
            return Ok(None);
        };

        let ignored = detector.toggle_ignored_channel(channel_id);
        if let Err(e) = self.persist_spam_policy(guild_id, &detector).await {
            // Keep runtime and storage in agreement.
            detector.toggle_ignored_channel(channel_id);
            return Err(e);
        }

        tracing::info!(guild_id, channel_id, ignored, "Spam ignore list changed");
        Ok(Some(ignored))
    }

    async fn persist_spam_policy(
        &self,
        guild_id: u64,
        detector: &SpamDetector,
    ) -> Result<(), ProtectionError> {
        let mut config = self.store.load_config(guild_id).await?;
        config.spam = Some(detector.policy());
        self.store.save_config(guild_id, &config).await
    }

    pub fn spam_detector(&self, guild_id: u64) -> Option<Arc<SpamDetector>> {
        self.spam.get(&guild_id).map(|detector| Arc::clone(&detector))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn status(&self, guild_id: u64) -> (Option<SpamStatus>, Option<RaidStatus>) {
        (
            self.spam_detector(guild_id).map(|detector| detector.status()),
            self.raid_detector(guild_id).map(|detector| detector.status()),
        )
    }

    pub fn is_active(&self, guild_id: u64) -> bool {
        self.raid.contains_key(&guild_id) || self.spam.contains_key(&guild_id)
    }

    /// Build fresh detectors for a guild from its stored policies.
    ///
    /// Skipped if the guild already has runtime state, so a repeated guild
    /// event does not wipe windows that are in flight. Returns whether
    /// anything was loaded.
    pub async fn restore_guild(&self, guild_id: u64) -> Result<bool, ProtectionError> {
        if self.is_active(guild_id) {
            return Ok(false);
        }

        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;
        self.departed.remove(&guild_id);
        // A start command may have won the lock first.
        if self.is_active(guild_id) {
            return Ok(false);
        }

        let config = self.store.load_config(guild_id).await?;
        Ok(self.arm_from_config(guild_id, config))
    }

    /// Restore every guild that has stored policies. Returns how many were armed.
    pub async fn restore_all(&self) -> Result<usize, ProtectionError> {
        let mut restored = 0;
        for guild_id in self.store.configured_guilds().await? {
            match self.restore_guild(guild_id).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(guild_id, "Failed to restore protection: {}", e);
                }
            }
        }
        Ok(restored)
    }

    fn arm_from_config(&self, guild_id: u64, config: GuildProtectionConfig) -> bool {
        let mut armed = false;

        if let Some(policy) = config.raid {
            match policy.normalized() {
                Ok(policy) => {
                    self.raid
                        .insert(guild_id, Arc::new(RaidDetector::new(guild_id, policy)));
                    armed = true;
                }
                Err(e) => tracing::warn!(guild_id, "Stored raid policy rejected: {}", e),
            }
        }

        if let Some(policy) = config.spam {
            match policy.normalized() {
                Ok(policy) => {
                    let detector =
                        SpamDetector::new(guild_id, policy, self.settings.spam_idle_window);
                    self.spam.insert(guild_id, Arc::new(detector));
                    armed = true;
                }
                Err(e) => tracing::warn!(guild_id, "Stored spam policy rejected: {}", e),
            }
        }

        if armed {
            tracing::info!(guild_id, "Protection restored");
        }
        armed
    }

    /// Drop all runtime state for a guild the bot is no longer in.
    /// Stored policies are kept for if the bot comes back.
    ///
    /// Waits for any config call already holding the guild's lock, then
    /// discards whatever it armed.
    pub async fn forget_guild(&self, guild_id: u64) {
        let lock = self.config_lock(guild_id);
        let _guard = lock.lock().await;

        self.departed.insert(guild_id);
        if let Some((_, detector)) = self.raid.remove(&guild_id) {
            detector.retire();
        }
        if let Some((_, detector)) = self.spam.remove(&guild_id) {
            detector.retire();
        }
        tracing::debug!(guild_id, "Protection state discarded");
    }
}
