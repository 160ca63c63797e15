//! Autorole service.
//!
//! [`AutoRoles`] owns the guild registry and the activity buffer and
//! wires them to the collaborator traits. Gateway handlers, control
//! commands and the scheduler all go through it.

use crate::accumulator::Accumulator;
use crate::error::{Error, Result};
use crate::provider::{Membership, Persistence, RoleMutator};
use crate::reconciler::{self, Outcome, PassReport};
use crate::registry::{GuildRegistry, GuildState, SharedGuild};
use fresnel_thz::{GuildId, RoleId, ScoreBook, Standing, ThresholdIndex, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Score bump applied when a new threshold is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrandfatherPolicy {
    /// A new rung above the current top lifts members who sat on the
    /// old top rung up to the new threshold.
    #[default]
    OutrankedTopRung,
    /// Members already holding the registered role are lifted to its
    /// threshold.
    HolderOfAddedRole,
    /// Never bump.
    Off,
}

impl FromStr for GrandfatherPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outranked-top-rung" => Ok(GrandfatherPolicy::OutrankedTopRung),
            "holder-of-added-role" => Ok(GrandfatherPolicy::HolderOfAddedRole),
            "off" => Ok(GrandfatherPolicy::Off),
            other => Err(Error::Config(format!("unknown grandfather policy: {}", other))),
        }
    }
}

impl fmt::Display for GrandfatherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrandfatherPolicy::OutrankedTopRung => "outranked-top-rung",
            GrandfatherPolicy::HolderOfAddedRole => "holder-of-added-role",
            GrandfatherPolicy::Off => "off",
        })
    }
}

/// Result of `add-threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdAdded {
    pub threshold: u64,
    pub role: RoleId,
    /// Former threshold if the role was moved.
    pub moved_from: Option<u64>,
    /// Members whose score was lifted to `threshold`.
    pub bumped: Vec<UserId>,
    pub pass: PassReport,
}

/// Result of `remove-threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRemoved {
    pub threshold: u64,
    pub role: RoleId,
    pub pass: PassReport,
}

/// Result of `query-score`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub user_id: UserId,
    pub score: u64,
    pub role_id: Option<RoleId>,
    pub rank: usize,
    pub tracked: usize,
}

/// Tally of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub guilds: usize,
    pub touched: usize,
    pub persisted: usize,
    pub changed: usize,
    pub failures: usize,
}

/// The autorole core.
pub struct AutoRoles {
    registry: GuildRegistry,
    activity: Accumulator,
    membership: Arc<dyn Membership>,
    mutator: Arc<dyn RoleMutator>,
    store: Arc<dyn Persistence>,
    policy: GrandfatherPolicy,
}

impl AutoRoles {
    pub fn new(
        membership: Arc<dyn Membership>,
        mutator: Arc<dyn RoleMutator>,
        store: Arc<dyn Persistence>,
        policy: GrandfatherPolicy,
    ) -> Self {
        Self {
            registry: GuildRegistry::new(),
            activity: Accumulator::new(),
            membership,
            mutator,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> GrandfatherPolicy {
        self.policy
    }

    pub fn registry(&self) -> &GuildRegistry {
        &self.registry
    }

    pub fn activity(&self) -> &Accumulator {
        &self.activity
    }

    async fn guild(&self, guild: GuildId) -> Result<SharedGuild> {
        self.registry
            .get(guild)
            .await
            .ok_or_else(|| Error::NotFound(format!("guild {} is not loaded", guild)))
    }

    // --- Guild lifecycle ---

    /// Build a guild's state from storage and the live snapshot.
    ///
    /// Stored scores of departed members and thresholds of deleted roles
    /// are purged. Reloading a loaded guild happens under its lock, and a
    /// score held in memory that is ahead of storage is kept and written
    /// back.
    pub async fn load_guild(&self, guild: GuildId) -> Result<()> {
        let existing = self.registry.get(guild).await;
        let mut current = match &existing {
            Some(shared) => Some(shared.lock().await),
            None => None,
        };

        let state = self.build_state(guild, current.as_deref()).await?;
        match current.as_mut() {
            Some(loaded) => **loaded = state,
            None => {
                self.registry.insert(state).await;
            }
        }
        Ok(())
    }

    async fn build_state(&self, guild: GuildId, previous: Option<&GuildState>) -> Result<GuildState> {
        let roster = self.membership.roster(guild).await?;
        let members: HashSet<UserId> = roster.iter().copied().collect();
        let live_roles: HashSet<RoleId> =
            self.membership.guild_roles(guild).await?.into_iter().collect();

        let (scores, stale_users): (Vec<_>, Vec<_>) = self
            .store
            .load_scores(guild)
            .await?
            .into_iter()
            .partition(|(user, _)| members.contains(user));
        let stale_users: Vec<UserId> = stale_users.into_iter().map(|(user, _)| user).collect();
        if !stale_users.is_empty() {
            if let Err(e) = self.store.delete_scores(guild, &stale_users).await {
                warn!(guild = %guild, "failed to purge departed members: {}", e);
            }
        }

        let (roles, mut stale_roles): (Vec<_>, Vec<_>) = self
            .store
            .load_roles(guild)
            .await?
            .into_iter()
            .partition(|(role, _)| live_roles.contains(role));
        let (ladder, rejected) = ThresholdIndex::from_rows(roles);
        stale_roles.extend(rejected);
        let stale_roles: Vec<RoleId> = stale_roles.into_iter().map(|(role, _)| role).collect();
        if !stale_roles.is_empty() {
            if let Err(e) = self.store.delete_roles(guild, &stale_roles).await {
                warn!(guild = %guild, "failed to purge deleted roles: {}", e);
            }
        }

        let mut scores = ScoreBook::from_rows(scores);
        let mut carried = 0;
        for (user, score) in previous.into_iter().flat_map(|state| state.scores.iter()) {
            if !members.contains(&user) || scores.get(user).is_some_and(|stored| stored >= score) {
                continue;
            }
            scores.set(user, score);
            carried += 1;
            if let Err(e) = self.store.upsert_score(guild, user, score).await {
                warn!(guild = %guild, user = %user, "failed to write back score: {}", e);
            }
        }

        let mut state = GuildState::new(guild, ladder, scores);
        for user in &roster {
            match self.membership.member_roles(guild, *user).await {
                Ok(Some(held)) => reconciler::seed(&mut state, *user, &held),
                Ok(None) => {}
                Err(e) => warn!(guild = %guild, user = %user, "failed to read member roles: {}", e),
            }
        }
        let pass = reconciler::reconcile_guild(&mut state, &*self.membership, &*self.mutator).await;

        info!(
            guild = %guild,
            thresholds = state.ladder.len(),
            tracked = state.scores.len(),
            purged_users = stale_users.len(),
            purged_roles = stale_roles.len(),
            changed = pass.changed,
            carried,
            reloaded = previous.is_some(),
            "loaded guild"
        );
        Ok(state)
    }

    /// Drop a guild's in-memory state. Its tables are kept.
    pub async fn unload_guild(&self, guild: GuildId) {
        self.activity.drop_guild(guild);
        if self.registry.remove(guild).await.is_some() {
            info!(guild = %guild, "unloaded guild");
        }
    }

    // --- Gateway handlers ---

    /// Buffer a message from a non-bot author until the next tick.
    pub fn on_message(&self, guild: GuildId, author: UserId, content: &str) {
        self.activity.record(guild, author, content);
    }

    pub async fn on_member_joined(&self, guild: GuildId, user: UserId) -> Result<()> {
        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        if state.scores.track(user) {
            if let Err(e) = self.store.upsert_score(guild, user, 0).await {
                warn!(guild = %guild, user = %user, "failed to persist new member: {}", e);
            }
        }
        reconciler::reconcile(&mut state, user, &*self.membership, &*self.mutator).await?;
        Ok(())
    }

    /// Re-read a member's roles after they changed on the platform.
    ///
    /// The assignment record is re-seeded from `held`, so a managed role
    /// added or removed by someone else is put back in line.
    pub async fn on_member_updated(&self, guild: GuildId, user: UserId, held: &[RoleId]) -> Result<Outcome> {
        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        reconciler::seed(&mut state, user, held);
        reconciler::reconcile(&mut state, user, &*self.membership, &*self.mutator).await
    }

    pub async fn on_member_left(&self, guild: GuildId, user: UserId) -> Result<()> {
        self.activity.forget(guild, user);
        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        let tracked = state.scores.contains(user);
        state.forget_member(user);
        if tracked {
            self.store.delete_scores(guild, &[user]).await?;
        }
        Ok(())
    }

    /// Unregister a role that was deleted on the platform.
    ///
    /// Returns false if the role was not managed.
    pub async fn on_role_deleted(&self, guild: GuildId, role: RoleId) -> Result<bool> {
        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        if state.ladder.remove(role).is_err() {
            return Ok(false);
        }
        reconciler::forget_role(&mut state, role);
        if let Err(e) = self.store.delete_roles(guild, &[role]).await {
            warn!(guild = %guild, role = %role, "failed to delete role row: {}", e);
        }

        let pass = reconciler::reconcile_guild(&mut state, &*self.membership, &*self.mutator).await;
        info!(guild = %guild, role = %role, changed = pass.changed, "managed role deleted");
        Ok(true)
    }

    // --- Administrative commands ---

    /// Register a role at a threshold, or move it there.
    pub async fn add_threshold(&self, guild: GuildId, threshold: i64, role: RoleId) -> Result<ThresholdAdded> {
        let threshold = u64::try_from(threshold)
            .map_err(|_| Error::InvalidInput(format!("threshold must be non-negative, got {}", threshold)))?;
        if !self.membership.role_exists(guild, role).await? {
            return Err(Error::NotFound(format!("role {} in guild {}", role, guild)));
        }

        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        let candidates = match self.policy {
            GrandfatherPolicy::OutrankedTopRung if !state.ladder.has_threshold(threshold) => {
                outranked_top_rung(&state, threshold)
            }
            _ => Vec::new(),
        };

        let moved_from = state.ladder.add(threshold, role)?;
        if let Err(e) = self.store.upsert_role(guild, role, threshold).await {
            let _ = state.ladder.remove(role);
            if let Some(old) = moved_from {
                let _ = state.ladder.add(old, role);
            }
            return Err(e);
        }

        let candidates = match self.policy {
            GrandfatherPolicy::HolderOfAddedRole => self.holders_below(&state, role, threshold).await,
            _ => candidates,
        };

        let mut bumped = Vec::new();
        for user in candidates {
            if state.scores.raise_to(user, threshold) {
                if let Err(e) = self.store.upsert_score(guild, user, threshold).await {
                    warn!(guild = %guild, user = %user, "failed to persist grandfathered score: {}", e);
                }
                bumped.push(user);
            }
        }

        let pass = reconciler::reconcile_guild(&mut state, &*self.membership, &*self.mutator).await;
        info!(
            guild = %guild,
            role = %role,
            threshold,
            bumped = bumped.len(),
            changed = pass.changed,
            "registered threshold"
        );

        Ok(ThresholdAdded {
            threshold,
            role,
            moved_from,
            bumped,
            pass,
        })
    }

    async fn holders_below(&self, state: &GuildState, role: RoleId, threshold: u64) -> Vec<UserId> {
        let mut holders = Vec::new();
        for (user, score) in state.scores.iter() {
            if score >= threshold {
                continue;
            }
            match self.membership.member_roles(state.guild, user).await {
                Ok(Some(held)) if held.contains(&role) => holders.push(user),
                Ok(_) => {}
                Err(e) => warn!(guild = %state.guild, user = %user, "failed to read member roles: {}", e),
            }
        }
        holders
    }

    /// Unregister a role.
    pub async fn remove_threshold(&self, guild: GuildId, role: RoleId) -> Result<ThresholdRemoved> {
        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        let threshold = state.ladder.remove(role)?;
        if let Err(e) = self.store.delete_roles(guild, &[role]).await {
            let _ = state.ladder.add(threshold, role);
            return Err(e);
        }

        let pass = reconciler::reconcile_guild(&mut state, &*self.membership, &*self.mutator).await;
        info!(guild = %guild, role = %role, threshold, changed = pass.changed, "unregistered threshold");
        Ok(ThresholdRemoved { threshold, role, pass })
    }

    /// Override a member's score. Returns the previous score, if any.
    pub async fn set_score(&self, guild: GuildId, user: UserId, score: i64) -> Result<Option<u64>> {
        let score = u64::try_from(score)
            .map_err(|_| Error::InvalidInput(format!("score must be non-negative, got {}", score)))?;
        if self.membership.member_roles(guild, user).await?.is_none() {
            return Err(Error::NotFound(format!("member {} in guild {}", user, guild)));
        }

        let shared = self.guild(guild).await?;
        let mut state = shared.lock().await;

        self.store.upsert_score(guild, user, score).await?;
        let previous = state.scores.set(user, score);
        if let Err(e) = reconciler::reconcile(&mut state, user, &*self.membership, &*self.mutator).await {
            warn!(guild = %guild, user = %user, "reconcile after override failed: {}", e);
        }
        Ok(previous)
    }

    // --- Read-only views ---

    pub async fn query_score(&self, guild: GuildId, user: UserId) -> Result<ScoreCard> {
        let shared = self.guild(guild).await?;
        let state = shared.lock().await;

        let score = state
            .scores
            .get(user)
            .ok_or_else(|| Error::NotFound(format!("untracked user {}", user)))?;
        let rank = state.scores.rank(user).unwrap_or(state.scores.len());
        Ok(ScoreCard {
            user_id: user,
            score,
            role_id: state.ladder.nearest_at_or_below(score),
            rank,
            tracked: state.scores.len(),
        })
    }

    /// Rungs in ascending threshold order.
    pub async fn list_thresholds(&self, guild: GuildId) -> Result<Vec<(u64, RoleId)>> {
        let shared = self.guild(guild).await?;
        let state = shared.lock().await;
        Ok(state.ladder.iter().collect())
    }

    pub async fn leaderboard(&self, guild: GuildId) -> Result<Vec<Standing>> {
        let shared = self.guild(guild).await?;
        let state = shared.lock().await;
        Ok(state.scores.leaderboard())
    }

    // --- Periodic allocation ---

    /// Fold buffered activity into scores, persist, and reconcile.
    ///
    /// Failures for one member or guild are logged and counted; they
    /// never stop the pass.
    pub async fn tick(&self) -> TickReport {
        let mut buffers = self.activity.drain();
        let mut report = TickReport::default();

        for guild in self.registry.guild_ids().await {
            let Some(shared) = self.registry.get(guild).await else {
                continue;
            };
            let mut state = shared.lock().await;

            let buffer = buffers.remove(&guild).unwrap_or_default();
            let touched = state.scores.fold(buffer);
            report.guilds += 1;
            report.touched += touched.len();

            for (user, score) in &touched {
                match self.store.upsert_score(guild, *user, *score).await {
                    Ok(()) => report.persisted += 1,
                    Err(e) => {
                        report.failures += 1;
                        warn!(guild = %guild, user = %user, "failed to persist score: {}", e);
                    }
                }
            }

            let users: Vec<UserId> = touched.iter().map(|(user, _)| *user).collect();
            let pass =
                reconciler::reconcile_many(&mut state, &users, &*self.membership, &*self.mutator).await;
            report.changed += pass.changed;
            report.failures += pass.failures;
        }

        for guild in buffers.keys() {
            debug!(guild = %guild, "dropping activity for unloaded guild");
        }
        report
    }
}

/// Members who sit on the current top rung when `threshold` would
/// become the new top.
fn outranked_top_rung(state: &GuildState, threshold: u64) -> Vec<UserId> {
    let Some((top, _)) = state.ladder.top() else {
        return Vec::new();
    };
    if threshold <= top {
        return Vec::new();
    }
    let mut users: Vec<UserId> = state
        .scores
        .iter()
        .filter(|(_, score)| (top..threshold).contains(score))
        .map(|(user, _)| user)
        .collect();
    users.sort_unstable();
    users
}
