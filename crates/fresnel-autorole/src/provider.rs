//! Collaborator interfaces.
//!
//! The autorole core never sees gateway or database types. It talks to
//! three narrow capabilities:
//!
//! - [`Membership`]: resolve members and roles in a guild snapshot
//! - [`RoleMutator`]: grant or revoke one role on one member
//! - [`Persistence`]: per-guild `roles` and `scores` tables
//!
//! Every call is a suspension point. Failures surface as
//! [`Error::Provider`](crate::Error::Provider) or
//! [`Error::Storage`](crate::Error::Storage) and are retried by the
//! next tick rather than in place.

use crate::error::Result;
use async_trait::async_trait;
use fresnel_thz::{GuildId, RoleId, UserId};

/// Read access to a guild's roster and roles.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Non-bot members of the guild.
    async fn roster(&self, guild: GuildId) -> Result<Vec<UserId>>;

    /// Every role that currently exists in the guild.
    async fn guild_roles(&self, guild: GuildId) -> Result<Vec<RoleId>>;

    /// Roles a member holds, or `None` if they are not in the guild.
    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Option<Vec<RoleId>>>;

    /// Whether a role exists in the guild.
    async fn role_exists(&self, guild: GuildId, role: RoleId) -> Result<bool>;
}

/// Role assignment on the platform.
#[async_trait]
pub trait RoleMutator: Send + Sync {
    async fn grant(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;

    async fn revoke(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;
}

/// Durable `roles(role_id PK, threshold)` and `scores(user_id PK, score)` tables.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Full scan of a guild's `roles` table.
    async fn load_roles(&self, guild: GuildId) -> Result<Vec<(RoleId, u64)>>;

    /// Full scan of a guild's `scores` table.
    async fn load_scores(&self, guild: GuildId) -> Result<Vec<(UserId, u64)>>;

    async fn upsert_role(&self, guild: GuildId, role: RoleId, threshold: u64) -> Result<()>;

    async fn upsert_score(&self, guild: GuildId, user: UserId, score: u64) -> Result<()>;

    async fn delete_roles(&self, guild: GuildId, roles: &[RoleId]) -> Result<()>;

    async fn delete_scores(&self, guild: GuildId, users: &[UserId]) -> Result<()>;
}
