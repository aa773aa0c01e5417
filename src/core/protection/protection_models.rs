// Protection domain models - policies, events and triggers.
//
// These are pure domain types with no Discord dependencies.
// IDs are raw u64 snowflakes, same as the rest of core.

use super::protection_ports::ProtectionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// PUNISHMENT ACTIONS
// ============================================================================

/// What happens to a member caught by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentAction {
    /// Mute role plus server voice mute.
    Mute,
    /// Mute role only.
    ChatMute,
    /// Server voice mute only.
    VoiceMute,
    Kick,
    Ban,
    /// Give the member a configured role.
    AddRole,
}

/// Capabilities of a punishment action. One row per variant.
#[derive(Debug, Clone, Copy)]
struct ActionTraits {
    name: &'static str,
    allows_duration: bool,
    needs_mute_role: bool,
    needs_role: bool,
}

impl PunishmentAction {
    pub const ALL: [PunishmentAction; 6] = [
        PunishmentAction::Mute,
        PunishmentAction::ChatMute,
        PunishmentAction::VoiceMute,
        PunishmentAction::Kick,
        PunishmentAction::Ban,
        PunishmentAction::AddRole,
    ];

    const fn traits(self) -> ActionTraits {
        match self {
            PunishmentAction::Mute => ActionTraits {
                name: "mute",
                allows_duration: true,
                needs_mute_role: true,
                needs_role: false,
            },
            PunishmentAction::ChatMute => ActionTraits {
                name: "chatmute",
                allows_duration: true,
                needs_mute_role: true,
                needs_role: false,
            },
            PunishmentAction::VoiceMute => ActionTraits {
                name: "voicemute",
                allows_duration: true,
                needs_mute_role: false,
                needs_role: false,
            },
            PunishmentAction::Kick => ActionTraits {
                name: "kick",
                allows_duration: false,
                needs_mute_role: false,
                needs_role: false,
            },
            PunishmentAction::Ban => ActionTraits {
                name: "ban",
                allows_duration: true,
                needs_mute_role: false,
                needs_role: false,
            },
            PunishmentAction::AddRole => ActionTraits {
                name: "addrole",
                allows_duration: true,
                needs_mute_role: false,
                needs_role: true,
            },
        }
    }

    /// Whether a punishment duration means anything for this action.
    pub fn is_duration_allowed(self) -> bool {
        self.traits().allows_duration
    }

    pub fn requires_mute_role(self) -> bool {
        self.traits().needs_mute_role
    }

    pub fn requires_role(self) -> bool {
        self.traits().needs_role
    }

    /// Zero the duration when the action can't carry one.
    pub fn gate_duration(self, minutes: u32) -> u32 {
        if self.is_duration_allowed() {
            minutes
        } else {
            0
        }
    }

    /// Stable lowercase name, used for storage.
    pub fn as_str(self) -> &'static str {
        self.traits().name
    }
}

impl fmt::Display for PunishmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PunishmentAction::Mute => "Mute",
            PunishmentAction::ChatMute => "Chat Mute",
            PunishmentAction::VoiceMute => "Voice Mute",
            PunishmentAction::Kick => "Kick",
            PunishmentAction::Ban => "Ban",
            PunishmentAction::AddRole => "Add Role",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for PunishmentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PunishmentAction::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| format!("Unknown punishment action: {}", s))
    }
}

/// Which detector produced a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionType {
    Raid,
    Spam,
}

impl fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionType::Raid => write!(f, "Anti-Raid"),
            ProtectionType::Spam => write!(f, "Anti-Spam"),
        }
    }
}

// ============================================================================
// POLICIES
// ============================================================================

/// Join-flood policy for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidPolicy {
    pub join_threshold: u32,
    pub window_seconds: u32,
    pub action: PunishmentAction,
    pub punish_duration_minutes: u32,
}

impl RaidPolicy {
    /// Build a validated policy. Durations on actions that can't carry one are zeroed.
    pub fn new(
        join_threshold: u32,
        window_seconds: u32,
        action: PunishmentAction,
        punish_duration_minutes: u32,
    ) -> Result<Self, ProtectionError> {
        Self {
            join_threshold,
            window_seconds,
            action,
            punish_duration_minutes,
        }
        .normalized()
    }

    /// Re-check a policy that came from somewhere else (storage, a command).
    pub fn normalized(mut self) -> Result<Self, ProtectionError> {
        if self.join_threshold < 1 {
            return Err(ProtectionError::InvalidThreshold(self.join_threshold));
        }
        if self.window_seconds < 1 {
            return Err(ProtectionError::InvalidWindow(self.window_seconds));
        }
        self.punish_duration_minutes = self.action.gate_duration(self.punish_duration_minutes);
        Ok(self)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_seconds))
    }
}

/// Message-flood policy for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamPolicy {
    pub message_threshold: u32,
    pub mute_duration_minutes: u32,
    pub action: PunishmentAction,
    pub role_id: Option<u64>,
    #[serde(default)]
    pub ignored_channels: BTreeSet<u64>,
}

impl SpamPolicy {
    /// Build a validated policy with no ignored channels.
    pub fn new(
        message_threshold: u32,
        mute_duration_minutes: u32,
        action: PunishmentAction,
        role_id: Option<u64>,
    ) -> Result<Self, ProtectionError> {
        Self {
            message_threshold,
            mute_duration_minutes,
            action,
            role_id,
            ignored_channels: BTreeSet::new(),
        }
        .normalized()
    }

    pub fn normalized(mut self) -> Result<Self, ProtectionError> {
        if self.message_threshold < 1 {
            return Err(ProtectionError::InvalidThreshold(self.message_threshold));
        }
        if self.action.requires_role() {
            if self.role_id.is_none() {
                return Err(ProtectionError::MissingRole);
            }
        } else {
            self.role_id = None;
        }
        self.mute_duration_minutes = self.action.gate_duration(self.mute_duration_minutes);
        Ok(self)
    }
}

/// Everything persisted for one guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildProtectionConfig {
    pub raid: Option<RaidPolicy>,
    pub spam: Option<SpamPolicy>,
}

impl GuildProtectionConfig {
    pub fn is_empty(&self) -> bool {
        self.raid.is_none() && self.spam.is_none()
    }
}

/// Engine-wide tuning knobs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ProtectionSettings {
    /// A spam run resets once its author has been quiet this long.
    pub spam_idle_window: Duration,
    /// Pause between two punishments of the same batch.
    pub punishment_spacing: Duration,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            spam_idle_window: Duration::from_secs(30),
            punishment_spacing: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// GATEWAY EVENTS
// ============================================================================

/// A member joined a guild.
#[derive(Debug, Clone, Copy)]
pub struct MemberJoin {
    pub guild_id: u64,
    pub member_id: u64,
    pub is_bot: bool,
}

/// A message was posted in a guild channel.
#[derive(Debug, Clone, Copy)]
pub struct GuildMessage {
    pub guild_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub is_bot: bool,
}

// ============================================================================
// TRIGGERS AND PUNISHMENTS
// ============================================================================

/// Produced by a detector when its threshold is met. Consumed once by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTrigger {
    pub guild_id: u64,
    pub kind: ProtectionType,
    pub action: PunishmentAction,
    pub duration_minutes: u32,
    pub role_id: Option<u64>,
    /// In detection order.
    pub affected_members: Vec<u64>,
    pub reason: String,
}

/// One call into the punishment executor.
#[derive(Debug, Clone, PartialEq)]
pub struct PunishmentRequest {
    pub guild_id: u64,
    pub member_id: u64,
    pub acting_user_id: u64,
    pub action: PunishmentAction,
    pub duration_minutes: u32,
    pub role_id: Option<u64>,
    pub reason: String,
}

/// Broadcast once a whole trigger batch has been processed.
#[derive(Debug, Clone)]
pub struct ProtectionTriggered {
    pub guild_id: u64,
    pub kind: ProtectionType,
    pub action: PunishmentAction,
    pub affected_members: Vec<u64>,
    /// Members whose punishment call failed.
    pub failed_members: Vec<u64>,
    pub triggered_at: DateTime<Utc>,
}

// ============================================================================
// STATUS SNAPSHOTS
// ============================================================================

/// Point-in-time view of a guild's raid detector.
#[derive(Debug, Clone)]
pub struct RaidStatus {
    pub policy: RaidPolicy,
    pub pending_members: Vec<u64>,
    pub pending_count: usize,
}

/// Point-in-time view of a guild's spam detector.
#[derive(Debug, Clone)]
pub struct SpamStatus {
    /// Carries the live ignored-channel set.
    pub policy: SpamPolicy,
    pub tracked_users: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_table() {
        assert!(PunishmentAction::Mute.is_duration_allowed());
        assert!(PunishmentAction::ChatMute.is_duration_allowed());
        assert!(PunishmentAction::VoiceMute.is_duration_allowed());
        assert!(PunishmentAction::Ban.is_duration_allowed());
        assert!(PunishmentAction::AddRole.is_duration_allowed());
        assert!(!PunishmentAction::Kick.is_duration_allowed());
    }

    #[test]
    fn test_kick_duration_is_zeroed() {
        let policy = RaidPolicy::new(5, 10, PunishmentAction::Kick, 30).unwrap();
        assert_eq!(policy.punish_duration_minutes, 0);

        let policy = SpamPolicy::new(3, 15, PunishmentAction::Kick, None).unwrap();
        assert_eq!(policy.mute_duration_minutes, 0);
    }

    #[test]
    fn test_invalid_raid_policy_rejected() {
        let err = RaidPolicy::new(0, 10, PunishmentAction::Ban, 0).unwrap_err();
        assert!(matches!(err, ProtectionError::InvalidThreshold(0)));
        assert!(err.is_configuration());

        let err = RaidPolicy::new(5, 0, PunishmentAction::Ban, 0).unwrap_err();
        assert!(matches!(err, ProtectionError::InvalidWindow(0)));
    }

    #[test]
    fn test_add_role_requires_role() {
        let err = SpamPolicy::new(3, 0, PunishmentAction::AddRole, None).unwrap_err();
        assert!(matches!(err, ProtectionError::MissingRole));

        let policy = SpamPolicy::new(3, 10, PunishmentAction::AddRole, Some(42)).unwrap();
        assert_eq!(policy.role_id, Some(42));
    }

    #[test]
    fn test_role_dropped_for_other_actions() {
        let policy = SpamPolicy::new(3, 10, PunishmentAction::Mute, Some(42)).unwrap();
        assert_eq!(policy.role_id, None);
    }

    #[test]
    fn test_action_names_parse_back() {
        for action in PunishmentAction::ALL {
            assert_eq!(action.as_str().parse::<PunishmentAction>().unwrap(), action);
        }
        assert!("warn".parse::<PunishmentAction>().is_err());
        assert_eq!(
            " ChatMute ".parse::<PunishmentAction>().unwrap(),
            PunishmentAction::ChatMute
        );
    }
}
