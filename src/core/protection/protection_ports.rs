// Ports for the protection engine - the traits core needs implemented by the
// outside world (storage, Discord API), plus the shared error type.
//
// NO Discord dependencies here. The infra layer implements the store, the
// discord layer implements the mute-role resolver and the punishment executor.

use super::protection_models::{GuildProtectionConfig, PunishmentRequest};
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Threshold must be at least 1 (got {0})")]
    InvalidThreshold(u32),

    #[error("Window must be at least 1 second (got {0})")]
    InvalidWindow(u32),

    #[error("The AddRole action needs a role to add")]
    MissingRole,

    #[error("Could not prepare the mute role: {0}")]
    MuteRole(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Punishment failed: {0}")]
    Executor(String),
}

impl ProtectionError {
    /// Errors caused by a bad admin request rather than by the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtectionError::InvalidThreshold(_)
                | ProtectionError::InvalidWindow(_)
                | ProtectionError::MissingRole
        )
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable home of the per-guild protection policies.
///
/// Only policies are stored. Pending joins and per-user message runs are
/// runtime-only and never reach this trait.
#[async_trait]
pub trait ProtectionStore: Send + Sync {
    /// Load the policies for a guild. A guild with nothing saved gets an empty config.
    async fn load_config(&self, guild_id: u64) -> Result<GuildProtectionConfig, ProtectionError>;

    /// Replace the stored policies for a guild.
    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildProtectionConfig,
    ) -> Result<(), ProtectionError>;

    /// Every guild that has at least one policy saved.
    async fn configured_guilds(&self) -> Result<Vec<u64>, ProtectionError>;
}

// ============================================================================
// PLATFORM TRAITS (PORTS)
// ============================================================================

/// Makes sure a guild has a working mute role before a mute-capable policy goes live.
#[async_trait]
pub trait MuteRoleResolver: Send + Sync {
    async fn ensure_mute_role(&self, guild_id: u64) -> Result<u64, ProtectionError>;
}

/// Applies a single punishment to a single member.
///
/// Implementations should tolerate being called for a member that is already
/// punished (or already gone) without treating it as fatal.
#[async_trait]
pub trait PunishmentExecutor: Send + Sync {
    async fn apply_punishment(&self, request: PunishmentRequest) -> Result<(), ProtectionError>;
}
