//! Gateway events and their dispatch.
//!
//! The gateway bridge delivers platform notifications as
//! [`GatewayEvent`]s. The [`Dispatcher`] first folds each event into the
//! [`LocalDirectory`] snapshot, then hands it to the autorole service.

use crate::directory::LocalDirectory;
use crate::error::Result;
use crate::service::AutoRoles;
use fresnel_thz::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A guild member as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// Notification from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Guild became available (start-up or the bot joined it)
    GuildAvailable {
        guild_id: GuildId,
        roles: Vec<RoleId>,
        members: Vec<MemberSnapshot>,
    },
    /// Bot left the guild or it became unavailable
    GuildRemoved { guild_id: GuildId },
    MessageCreated {
        guild_id: GuildId,
        author_id: UserId,
        #[serde(default)]
        bot: bool,
        content: String,
    },
    MemberJoined {
        guild_id: GuildId,
        member: MemberSnapshot,
    },
    MemberLeft { guild_id: GuildId, user_id: UserId },
    /// A member's roles changed outside of this process
    MemberUpdated {
        guild_id: GuildId,
        member: MemberSnapshot,
    },
    RoleCreated { guild_id: GuildId, role_id: RoleId },
    RoleDeleted { guild_id: GuildId, role_id: RoleId },
}

impl GatewayEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            GatewayEvent::GuildAvailable { guild_id, .. }
            | GatewayEvent::GuildRemoved { guild_id }
            | GatewayEvent::MessageCreated { guild_id, .. }
            | GatewayEvent::MemberJoined { guild_id, .. }
            | GatewayEvent::MemberLeft { guild_id, .. }
            | GatewayEvent::MemberUpdated { guild_id, .. }
            | GatewayEvent::RoleCreated { guild_id, .. }
            | GatewayEvent::RoleDeleted { guild_id, .. } => *guild_id,
        }
    }
}

/// Routes gateway events to the directory and the autorole service.
pub struct Dispatcher {
    directory: Arc<LocalDirectory>,
    service: Arc<AutoRoles>,
}

impl Dispatcher {
    pub fn new(directory: Arc<LocalDirectory>, service: Arc<AutoRoles>) -> Self {
        Self { directory, service }
    }

    pub fn service(&self) -> &Arc<AutoRoles> {
        &self.service
    }

    pub fn directory(&self) -> &Arc<LocalDirectory> {
        &self.directory
    }

    /// Apply one event.
    pub async fn dispatch(&self, event: GatewayEvent) -> Result<()> {
        self.directory.apply(&event);

        match event {
            GatewayEvent::GuildAvailable { guild_id, .. } => {
                self.service.load_guild(guild_id).await?;
            }
            GatewayEvent::GuildRemoved { guild_id } => {
                self.service.unload_guild(guild_id).await;
            }
            GatewayEvent::MessageCreated {
                guild_id,
                author_id,
                bot,
                content,
            } => {
                if !bot {
                    self.service.on_message(guild_id, author_id, &content);
                }
            }
            GatewayEvent::MemberJoined { guild_id, member } => {
                if !member.bot {
                    self.service.on_member_joined(guild_id, member.user_id).await?;
                }
            }
            GatewayEvent::MemberLeft { guild_id, user_id } => {
                self.service.on_member_left(guild_id, user_id).await?;
            }
            GatewayEvent::RoleDeleted { guild_id, role_id } => {
                self.service.on_role_deleted(guild_id, role_id).await?;
            }
            GatewayEvent::MemberUpdated { guild_id, member } => {
                if !member.bot {
                    self.service
                        .on_member_updated(guild_id, member.user_id, &member.roles)
                        .await?;
                }
            }
            GatewayEvent::RoleCreated { .. } => {}
        }

        Ok(())
    }
}
