// In-memory implementation of ProtectionStore.
//
// Nothing survives a restart. Used by tests and handy for running the bot
// without a database file.

use crate::core::protection::{GuildProtectionConfig, ProtectionError, ProtectionStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Clones share the same underlying map, so a "restarted" registry can be
/// handed the same storage in tests.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct InMemoryProtectionStore {
    /// Maps guild_id -> stored policies
    configs: Arc<DashMap<u64, GuildProtectionConfig>>,
}

#[allow(dead_code)]
impl InMemoryProtectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtectionStore for InMemoryProtectionStore {
    async fn load_config(&self, guild_id: u64) -> Result<GuildProtectionConfig, ProtectionError> {
        Ok(self
            .configs
            .get(&guild_id)
            .map(|config| config.clone())
            .unwrap_or_default())
    }

    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildProtectionConfig,
    ) -> Result<(), ProtectionError> {
        if config.is_empty() {
            self.configs.remove(&guild_id);
        } else {
            self.configs.insert(guild_id, config.clone());
        }
        Ok(())
    }

    async fn configured_guilds(&self) -> Result<Vec<u64>, ProtectionError> {
        let mut guilds: Vec<u64> = self.configs.iter().map(|entry| *entry.key()).collect();
        guilds.sort_unstable();
        Ok(guilds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::{PunishmentAction, RaidPolicy};

    #[tokio::test]
    async fn test_unknown_guild_is_empty() {
        let store = InMemoryProtectionStore::new();
        assert!(store.load_config(1).await.unwrap().is_empty());
        assert!(store.configured_guilds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_config_removes_guild() {
        let store = InMemoryProtectionStore::new();
        let config = GuildProtectionConfig {
            raid: Some(RaidPolicy::new(5, 10, PunishmentAction::Ban, 0).unwrap()),
            spam: None,
        };
        store.save_config(1, &config).await.unwrap();
        assert_eq!(store.configured_guilds().await.unwrap(), vec![1]);

        store
            .save_config(1, &GuildProtectionConfig::default())
            .await
            .unwrap();
        assert!(store.configured_guilds().await.unwrap().is_empty());
    }
}
