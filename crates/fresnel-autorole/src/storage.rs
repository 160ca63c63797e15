//! Persistent storage using RocksDB.
//!
//! Each guild owns two logical tables, laid out as key prefixes:
//!
//! - `roles:{guild}:{role}` → [`RoleRow`]
//! - `scores:{guild}:{user}` → [`ScoreRow`]

use crate::error::Result;
use crate::provider::Persistence;
use async_trait::async_trait;
use fresnel_thz::{GuildId, RoleId, UserId};
use rocksdb::{Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

/// A row of the `roles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub role_id: RoleId,
    pub threshold: u64,
}

/// A row of the `scores` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub user_id: UserId,
    pub score: u64,
}

/// Storage backend for autorole data.
pub struct Storage {
    db: DB,
}

fn role_key(guild: GuildId, role: RoleId) -> String {
    format!("roles:{}:{}", guild, role)
}

fn score_key(guild: GuildId, user: UserId) -> String {
    format!("scores:{}:{}", guild, user)
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let prefix = prefix.as_bytes();
        let mut rows = Vec::new();

        let iter = self.db.prefix_iterator(prefix);
        for item in iter {
            let (key, value) = item?;
            if key.starts_with(prefix) {
                rows.push(serde_json::from_slice(&value)?);
            } else {
                break;
            }
        }

        Ok(rows)
    }

    // --- Roles ---

    /// Every registered role of a guild.
    pub fn list_roles(&self, guild: GuildId) -> Result<Vec<RoleRow>> {
        self.scan(&format!("roles:{}:", guild))
    }

    /// Insert or replace a role's threshold.
    pub fn put_role(&self, guild: GuildId, row: &RoleRow) -> Result<()> {
        let value = serde_json::to_vec(row)?;
        self.db.put(role_key(guild, row.role_id).as_bytes(), value)?;
        Ok(())
    }

    /// Delete many roles in one batch.
    pub fn delete_role_rows(&self, guild: GuildId, roles: &[RoleId]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for role in roles {
            batch.delete(role_key(guild, *role).as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    // --- Scores ---

    /// Every tracked score of a guild.
    pub fn list_scores(&self, guild: GuildId) -> Result<Vec<ScoreRow>> {
        self.scan(&format!("scores:{}:", guild))
    }

    /// Get one member's score.
    pub fn get_score(&self, guild: GuildId, user: UserId) -> Result<Option<u64>> {
        match self.db.get(score_key(guild, user).as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice::<ScoreRow>(&data)?.score)),
            None => Ok(None),
        }
    }

    /// Insert or replace a member's score.
    pub fn put_score(&self, guild: GuildId, row: &ScoreRow) -> Result<()> {
        let value = serde_json::to_vec(row)?;
        self.db.put(score_key(guild, row.user_id).as_bytes(), value)?;
        Ok(())
    }

    /// Delete many scores in one batch.
    pub fn delete_score_rows(&self, guild: GuildId, users: &[UserId]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for user in users {
            batch.delete(score_key(guild, *user).as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for Storage {
    async fn load_roles(&self, guild: GuildId) -> Result<Vec<(RoleId, u64)>> {
        Ok(self
            .list_roles(guild)?
            .into_iter()
            .map(|row| (row.role_id, row.threshold))
            .collect())
    }

    async fn load_scores(&self, guild: GuildId) -> Result<Vec<(UserId, u64)>> {
        Ok(self
            .list_scores(guild)?
            .into_iter()
            .map(|row| (row.user_id, row.score))
            .collect())
    }

    async fn upsert_role(&self, guild: GuildId, role: RoleId, threshold: u64) -> Result<()> {
        self.put_role(guild, &RoleRow { role_id: role, threshold })
    }

    async fn upsert_score(&self, guild: GuildId, user: UserId, score: u64) -> Result<()> {
        self.put_score(guild, &ScoreRow { user_id: user, score })
    }

    async fn delete_roles(&self, guild: GuildId, roles: &[RoleId]) -> Result<()> {
        self.delete_role_rows(guild, roles)
    }

    async fn delete_scores(&self, guild: GuildId, users: &[UserId]) -> Result<()> {
        self.delete_score_rows(guild, users)
    }
}
