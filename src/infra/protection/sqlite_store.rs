// SQLite-backed store for protection policies.
//
// Tables:
// - antiraid_settings: One raid policy per guild
// - antispam_settings: One spam policy per guild, ignored channels as a JSON array

use crate::core::protection::{
    GuildProtectionConfig, ProtectionError, ProtectionStore, PunishmentAction, RaidPolicy,
    SpamPolicy,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;

pub struct SqliteProtectionStore {
    pool: Pool<Sqlite>,
}

fn storage_error(e: impl std::fmt::Display) -> ProtectionError {
    ProtectionError::Storage(e.to_string())
}

/// Read an unsigned column, rejecting values that don't fit instead of wrapping.
fn get_u32(row: &SqliteRow, column: &str) -> Result<u32, ProtectionError> {
    let value: i64 = row.try_get(column).map_err(storage_error)?;
    u32::try_from(value)
        .map_err(|_| storage_error(format!("{} out of range: {}", column, value)))
}

impl SqliteProtectionStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the tables if they don't exist yet.
    pub async fn migrate(&self) -> Result<(), ProtectionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS antiraid_settings (
                guild_id INTEGER PRIMARY KEY,
                user_threshold INTEGER NOT NULL,
                seconds INTEGER NOT NULL,
                action TEXT NOT NULL,
                punish_duration INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS antispam_settings (
                guild_id INTEGER PRIMARY KEY,
                message_threshold INTEGER NOT NULL,
                mute_time INTEGER NOT NULL DEFAULT 0,
                action TEXT NOT NULL,
                role_id INTEGER,
                ignored_channels TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn load_raid(&self, guild_id: u64) -> Result<Option<RaidPolicy>, ProtectionError> {
        let row = sqlx::query("SELECT * FROM antiraid_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let action: String = row.get("action");
        Ok(Some(RaidPolicy {
            join_threshold: get_u32(&row, "user_threshold")?,
            window_seconds: get_u32(&row, "seconds")?,
            action: action.parse::<PunishmentAction>().map_err(storage_error)?,
            punish_duration_minutes: get_u32(&row, "punish_duration")?,
        }))
    }

    async fn load_spam(&self, guild_id: u64) -> Result<Option<SpamPolicy>, ProtectionError> {
        let row = sqlx::query("SELECT * FROM antispam_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let action: String = row.get("action");
        let ignored_json: String = row.get("ignored_channels");
        let ignored_channels: BTreeSet<u64> =
            serde_json::from_str(&ignored_json).map_err(storage_error)?;

        Ok(Some(SpamPolicy {
            message_threshold: get_u32(&row, "message_threshold")?,
            mute_duration_minutes: get_u32(&row, "mute_time")?,
            action: action.parse::<PunishmentAction>().map_err(storage_error)?,
            role_id: row.get::<Option<i64>, _>("role_id").map(|id| id as u64),
            ignored_channels,
        }))
    }
}

#[async_trait]
impl ProtectionStore for SqliteProtectionStore {
    async fn load_config(&self, guild_id: u64) -> Result<GuildProtectionConfig, ProtectionError> {
        Ok(GuildProtectionConfig {
            raid: self.load_raid(guild_id).await?,
            spam: self.load_spam(guild_id).await?,
        })
    }

    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildProtectionConfig,
    ) -> Result<(), ProtectionError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        match &config.raid {
            Some(raid) => {
                sqlx::query(
                    r#"
                    INSERT INTO antiraid_settings (guild_id, user_threshold, seconds, action, punish_duration)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(guild_id) DO UPDATE SET
                        user_threshold = excluded.user_threshold,
                        seconds = excluded.seconds,
                        action = excluded.action,
                        punish_duration = excluded.punish_duration
                    "#,
                )
                .bind(guild_id as i64)
                .bind(raid.join_threshold as i64)
                .bind(raid.window_seconds as i64)
                .bind(raid.action.as_str())
                .bind(raid.punish_duration_minutes as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            }
            None => {
                sqlx::query("DELETE FROM antiraid_settings WHERE guild_id = ?")
                    .bind(guild_id as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error)?;
            }
        }

        match &config.spam {
            Some(spam) => {
                let ignored_json =
                    serde_json::to_string(&spam.ignored_channels).map_err(storage_error)?;
                sqlx::query(
                    r#"
                    INSERT INTO antispam_settings (guild_id, message_threshold, mute_time, action, role_id, ignored_channels)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(guild_id) DO UPDATE SET
                        message_threshold = excluded.message_threshold,
                        mute_time = excluded.mute_time,
                        action = excluded.action,
                        role_id = excluded.role_id,
                        ignored_channels = excluded.ignored_channels
                    "#,
                )
                .bind(guild_id as i64)
                .bind(spam.message_threshold as i64)
                .bind(spam.mute_duration_minutes as i64)
                .bind(spam.action.as_str())
                .bind(spam.role_id.map(|id| id as i64))
                .bind(ignored_json)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            }
            None => {
                sqlx::query("DELETE FROM antispam_settings WHERE guild_id = ?")
                    .bind(guild_id as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error)?;
            }
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn configured_guilds(&self) -> Result<Vec<u64>, ProtectionError> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id FROM antiraid_settings
            UNION
            SELECT guild_id FROM antispam_settings
            ORDER BY guild_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("guild_id") as u64)
            .collect())
    }
}
