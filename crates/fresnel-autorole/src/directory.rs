//! In-process guild snapshot.
//!
//! `LocalDirectory` mirrors what the gateway has told us about each
//! guild (roles, members, held roles) and serves it through
//! [`Membership`]. Grants and revokes are applied to the snapshot and
//! published on a broadcast channel for the gateway bridge to carry to
//! the platform.

use crate::error::{Error, Result};
use crate::events::{GatewayEvent, MemberSnapshot};
use crate::provider::{Membership, RoleMutator};
use async_trait::async_trait;
use fresnel_thz::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// An outbound role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoleMutation {
    Grant {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
    Revoke {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
}

#[derive(Debug, Default)]
struct Member {
    bot: bool,
    roles: HashSet<RoleId>,
}

#[derive(Debug, Default)]
struct GuildSnapshot {
    roles: HashSet<RoleId>,
    members: HashMap<UserId, Member>,
}

impl GuildSnapshot {
    fn upsert_member(&mut self, member: &MemberSnapshot) {
        self.members.insert(
            member.user_id,
            Member {
                bot: member.bot,
                roles: member.roles.iter().copied().collect(),
            },
        );
    }
}

/// Snapshot of every guild the gateway reported.
pub struct LocalDirectory {
    guilds: RwLock<HashMap<GuildId, GuildSnapshot>>,
    mutation_tx: broadcast::Sender<RoleMutation>,
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDirectory {
    pub fn new() -> Self {
        let (mutation_tx, _) = broadcast::channel(1024);
        Self {
            guilds: RwLock::new(HashMap::new()),
            mutation_tx,
        }
    }

    /// Subscribe to outbound role changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RoleMutation> {
        self.mutation_tx.subscribe()
    }

    /// Fold a gateway event into the snapshot.
    pub fn apply(&self, event: &GatewayEvent) {
        let mut guilds = self.guilds.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            GatewayEvent::GuildAvailable {
                guild_id,
                roles,
                members,
            } => {
                let mut snapshot = GuildSnapshot {
                    roles: roles.iter().copied().collect(),
                    members: HashMap::new(),
                };
                for member in members {
                    snapshot.upsert_member(member);
                }
                guilds.insert(*guild_id, snapshot);
            }
            GatewayEvent::GuildRemoved { guild_id } => {
                guilds.remove(guild_id);
            }
            GatewayEvent::MemberJoined { guild_id, member }
            | GatewayEvent::MemberUpdated { guild_id, member } => {
                guilds.entry(*guild_id).or_default().upsert_member(member);
            }
            GatewayEvent::MemberLeft { guild_id, user_id } => {
                if let Some(snapshot) = guilds.get_mut(guild_id) {
                    snapshot.members.remove(user_id);
                }
            }
            GatewayEvent::RoleCreated { guild_id, role_id } => {
                guilds.entry(*guild_id).or_default().roles.insert(*role_id);
            }
            GatewayEvent::RoleDeleted { guild_id, role_id } => {
                if let Some(snapshot) = guilds.get_mut(guild_id) {
                    snapshot.roles.remove(role_id);
                    for member in snapshot.members.values_mut() {
                        member.roles.remove(role_id);
                    }
                }
            }
            GatewayEvent::MessageCreated { .. } => {}
        }
    }

    /// Whether a member currently holds a role.
    pub fn holds(&self, guild: GuildId, user: UserId, role: RoleId) -> bool {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        guilds
            .get(&guild)
            .and_then(|g| g.members.get(&user))
            .is_some_and(|m| m.roles.contains(&role))
    }

    fn mutate(&self, mutation: RoleMutation) -> Result<()> {
        let (guild, user, role, grant) = match mutation {
            RoleMutation::Grant { guild_id, user_id, role_id } => (guild_id, user_id, role_id, true),
            RoleMutation::Revoke { guild_id, user_id, role_id } => (guild_id, user_id, role_id, false),
        };

        {
            let mut guilds = self.guilds.write().unwrap_or_else(PoisonError::into_inner);
            let snapshot = guilds
                .get_mut(&guild)
                .ok_or_else(|| Error::Provider(format!("unknown guild {}", guild)))?;
            if !snapshot.roles.contains(&role) {
                return Err(Error::Provider(format!("unknown role {} in guild {}", role, guild)));
            }
            let member = snapshot
                .members
                .get_mut(&user)
                .ok_or_else(|| Error::Provider(format!("unknown member {} in guild {}", user, guild)))?;
            if grant {
                member.roles.insert(role);
            } else {
                member.roles.remove(&role);
            }
        }

        // Err only means nobody is subscribed.
        let _ = self.mutation_tx.send(mutation);
        Ok(())
    }
}

#[async_trait]
impl Membership for LocalDirectory {
    async fn roster(&self, guild: GuildId) -> Result<Vec<UserId>> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = guilds
            .get(&guild)
            .ok_or_else(|| Error::NotFound(format!("guild {}", guild)))?;
        let mut users: Vec<UserId> = snapshot
            .members
            .iter()
            .filter(|(_, m)| !m.bot)
            .map(|(user, _)| *user)
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    async fn guild_roles(&self, guild: GuildId) -> Result<Vec<RoleId>> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = guilds
            .get(&guild)
            .ok_or_else(|| Error::NotFound(format!("guild {}", guild)))?;
        Ok(snapshot.roles.iter().copied().collect())
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Option<Vec<RoleId>>> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guilds
            .get(&guild)
            .and_then(|g| g.members.get(&user))
            .map(|m| {
                let mut roles: Vec<RoleId> = m.roles.iter().copied().collect();
                roles.sort_unstable();
                roles
            }))
    }

    async fn role_exists(&self, guild: GuildId, role: RoleId) -> Result<bool> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guilds.get(&guild).is_some_and(|g| g.roles.contains(&role)))
    }
}

#[async_trait]
impl RoleMutator for LocalDirectory {
    async fn grant(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.mutate(RoleMutation::Grant {
            guild_id: guild,
            user_id: user,
            role_id: role,
        })
    }

    async fn revoke(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.mutate(RoleMutation::Revoke {
            guild_id: guild,
            user_id: user,
            role_id: role,
        })
    }
}
