//! Role reconciliation.
//!
//! For one member the reconciler derives the target role from their
//! score, compares it with the assignment record, and only when the two
//! differ asks the platform for the member's roles and issues the
//! minimal grant/revoke calls:
//!
//! ```text
//! target = ladder.nearest_at_or_below(score)
//! target == assigned  ──► done, zero external calls
//! otherwise           ──► grant target (if not held)
//!                         revoke held managed roles != target
//!                         assigned := target   (only if every call succeeded)
//! ```
//!
//! A failed call leaves the record untouched, so the mismatch is still
//! visible to the next pass and is retried there.

use crate::error::{Error, Result};
use crate::provider::{Membership, RoleMutator};
use crate::registry::GuildState;
use fresnel_thz::{RoleId, ThresholdIndex, UserId};
use tracing::{debug, warn};

/// External calls needed to move a member onto their target role.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RolePlan {
    pub target: Option<RoleId>,
    pub grant: Option<RoleId>,
    pub revoke: Vec<RoleId>,
}

impl RolePlan {
    pub fn is_noop(&self) -> bool {
        self.grant.is_none() && self.revoke.is_empty()
    }
}

/// Compute the grant/revoke set for a member.
///
/// `held` is every role the member has on the platform. Managed roles
/// other than `target` are revoked, as is the previously `assigned` role
/// even if it has since been unregistered from the ladder.
pub fn plan(
    ladder: &ThresholdIndex,
    target: Option<RoleId>,
    assigned: Option<RoleId>,
    held: &[RoleId],
) -> RolePlan {
    let grant = target.filter(|role| !held.contains(role));
    let mut revoke = ladder.role_ids_in(held);
    if let Some(stale) = assigned.filter(|role| held.contains(role) && !revoke.contains(role)) {
        revoke.push(stale);
    }
    revoke.retain(|role| Some(*role) != target);

    RolePlan { target, grant, revoke }
}

/// Result of reconciling one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Record already matched the target.
    Unchanged,
    /// Record moved to `plan.target` after applying `plan`.
    Applied(RolePlan),
}

impl Outcome {
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

/// Bring one member's managed role in line with their score.
pub async fn reconcile(
    state: &mut GuildState,
    user: UserId,
    membership: &dyn Membership,
    mutator: &dyn RoleMutator,
) -> Result<Outcome> {
    let target = state.derived_role(user);
    let assigned = state.assigned(user);
    if target == assigned {
        return Ok(Outcome::Unchanged);
    }

    let guild = state.guild;
    let held = membership
        .member_roles(guild, user)
        .await?
        .ok_or_else(|| Error::NotFound(format!("member {} in guild {}", user, guild)))?;

    let plan = plan(&state.ladder, target, assigned, &held);
    if let Some(role) = plan.grant {
        mutator.grant(guild, user, role).await?;
    }
    for role in &plan.revoke {
        mutator.revoke(guild, user, *role).await?;
    }

    debug!(
        guild = %guild,
        user = %user,
        from = ?assigned,
        to = ?target,
        "reconciled role"
    );
    state.set_assigned(user, target);
    Ok(Outcome::Applied(plan))
}

/// Tally of a multi-member reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub reconciled: usize,
    pub changed: usize,
    pub failures: usize,
}

/// Reconcile each of `users`, isolating failures.
pub async fn reconcile_many(
    state: &mut GuildState,
    users: &[UserId],
    membership: &dyn Membership,
    mutator: &dyn RoleMutator,
) -> PassReport {
    let mut report = PassReport::default();
    for &user in users {
        match reconcile(state, user, membership, mutator).await {
            Ok(outcome) => {
                report.reconciled += 1;
                if outcome.changed() {
                    report.changed += 1;
                }
            }
            Err(e) => {
                report.failures += 1;
                warn!(guild = %state.guild, user = %user, "reconcile failed: {}", e);
            }
        }
    }
    report
}

/// Reconcile every member the guild tracks.
pub async fn reconcile_guild(
    state: &mut GuildState,
    membership: &dyn Membership,
    mutator: &dyn RoleMutator,
) -> PassReport {
    let users = state.reconcilable_users();
    reconcile_many(state, &users, membership, mutator).await
}

/// Initialise a member's record from the roles they already hold.
pub fn seed(state: &mut GuildState, user: UserId, held: &[RoleId]) {
    let highest = state.ladder.highest_held(held);
    state.set_assigned(user, highest);
}

/// Clear records pointing at a role that no longer exists.
///
/// Returns the affected members.
pub fn forget_role(state: &mut GuildState, role: RoleId) -> Vec<UserId> {
    let affected: Vec<UserId> = state
        .assigned_users()
        .filter(|user| state.assigned(*user) == Some(role))
        .collect();
    for user in &affected {
        state.set_assigned(*user, None);
    }
    affected
}
