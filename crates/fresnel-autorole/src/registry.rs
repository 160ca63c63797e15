//! Per-guild state and the registry that owns it.
//!
//! Each guild's ladder, scores and role assignments live behind a single
//! `tokio::sync::Mutex`. Whoever holds the guard is the only writer for
//! that guild, across every suspension point, so a tick and a threshold
//! edit for the same guild can never interleave.

use fresnel_thz::{GuildId, RoleId, ScoreBook, ThresholdIndex, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Everything the autorole core knows about one guild.
#[derive(Debug)]
pub struct GuildState {
    pub guild: GuildId,
    pub ladder: ThresholdIndex,
    pub scores: ScoreBook,
    /// Managed role each member is believed to hold. Written only by
    /// the reconciler.
    assigned: HashMap<UserId, RoleId>,
}

impl GuildState {
    pub fn new(guild: GuildId, ladder: ThresholdIndex, scores: ScoreBook) -> Self {
        Self {
            guild,
            ladder,
            scores,
            assigned: HashMap::new(),
        }
    }

    /// The managed role last applied to a member.
    pub fn assigned(&self, user: UserId) -> Option<RoleId> {
        self.assigned.get(&user).copied()
    }

    pub(crate) fn set_assigned(&mut self, user: UserId, role: Option<RoleId>) {
        match role {
            Some(role) => self.assigned.insert(user, role),
            None => self.assigned.remove(&user),
        };
    }

    /// Members with an assignment record.
    pub fn assigned_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.assigned.keys().copied()
    }

    /// Members the reconciler is responsible for: tracked or assigned.
    pub fn reconcilable_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.scores.users().collect();
        users.extend(self.assigned_users().filter(|u| !self.scores.contains(*u)));
        users.sort_unstable();
        users
    }

    /// Role the ladder currently derives for a member.
    pub fn derived_role(&self, user: UserId) -> Option<RoleId> {
        self.scores
            .get(user)
            .and_then(|score| self.ladder.nearest_at_or_below(score))
    }

    /// Purge every per-member record.
    pub fn forget_member(&mut self, user: UserId) {
        self.scores.remove(user);
        self.assigned.remove(&user);
    }
}

/// Shared handle to one guild's state.
pub type SharedGuild = Arc<Mutex<GuildState>>;

/// Owner of every loaded guild.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    guilds: RwLock<HashMap<GuildId, SharedGuild>>,
}

impl GuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) a guild's state.
    pub async fn insert(&self, state: GuildState) -> SharedGuild {
        let guild = state.guild;
        let shared = Arc::new(Mutex::new(state));
        self.guilds.write().await.insert(guild, Arc::clone(&shared));
        shared
    }

    pub async fn get(&self, guild: GuildId) -> Option<SharedGuild> {
        self.guilds.read().await.get(&guild).cloned()
    }

    pub async fn remove(&self, guild: GuildId) -> Option<SharedGuild> {
        self.guilds.write().await.remove(&guild)
    }

    pub async fn contains(&self, guild: GuildId) -> bool {
        self.guilds.read().await.contains_key(&guild)
    }

    /// Loaded guilds in ascending id order.
    pub async fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
