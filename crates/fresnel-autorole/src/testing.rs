//! Test doubles and a loaded single-guild fixture.

use crate::directory::LocalDirectory;
use crate::error::{Error, Result};
use crate::events::{GatewayEvent, MemberSnapshot};
use crate::provider::{Persistence, RoleMutator};
use crate::service::{AutoRoles, GrandfatherPolicy};
use async_trait::async_trait;
use fresnel_thz::{GuildId, RoleId, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GUILD: GuildId = GuildId(1);
pub const A: RoleId = RoleId(10);
pub const B: RoleId = RoleId(11);
pub const C: RoleId = RoleId(12);
pub const D: RoleId = RoleId(13);

/// Consume one pending injected failure, if any.
fn take_failure(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Role mutator that logs successful calls and can be told to fail.
pub struct RecordingMutator {
    inner: Arc<LocalDirectory>,
    log: Mutex<Vec<(&'static str, u64, RoleId)>>,
    failures: AtomicUsize,
}

impl RecordingMutator {
    pub fn new(inner: Arc<LocalDirectory>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<(&'static str, u64, RoleId)> {
        self.log.lock().unwrap().clone()
    }

    /// Fail the next `n` grant/revoke calls.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if take_failure(&self.failures) {
            return Err(Error::Provider("injected role failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleMutator for RecordingMutator {
    async fn grant(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.check()?;
        self.inner.grant(guild, user, role).await?;
        self.log.lock().unwrap().push(("grant", user.get(), role));
        Ok(())
    }

    async fn revoke(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.check()?;
        self.inner.revoke(guild, user, role).await?;
        self.log.lock().unwrap().push(("revoke", user.get(), role));
        Ok(())
    }
}

/// In-memory tables with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    roles: Mutex<HashMap<(GuildId, RoleId), u64>>,
    scores: Mutex<HashMap<(GuildId, UserId), u64>>,
    failures: AtomicUsize,
    score_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStore {
    /// Fail the next `n` calls of any kind.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make every score write take `delay` on the tokio clock.
    pub fn slow_score_writes(&self, delay: Duration) {
        *self.score_delay.lock().unwrap() = delay;
    }

    /// Most score writes ever in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seed_role(&self, guild: GuildId, role: RoleId, threshold: u64) {
        self.roles.lock().unwrap().insert((guild, role), threshold);
    }

    pub fn seed_score(&self, guild: GuildId, user: UserId, score: u64) {
        self.scores.lock().unwrap().insert((guild, user), score);
    }

    pub fn role(&self, guild: GuildId, role: RoleId) -> Option<u64> {
        self.roles.lock().unwrap().get(&(guild, role)).copied()
    }

    pub fn score(&self, guild: GuildId, user: UserId) -> Option<u64> {
        self.scores.lock().unwrap().get(&(guild, user)).copied()
    }

    fn check(&self) -> Result<()> {
        if take_failure(&self.failures) {
            return Err(Error::Storage("injected storage failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn load_roles(&self, guild: GuildId) -> Result<Vec<(RoleId, u64)>> {
        self.check()?;
        let roles = self.roles.lock().unwrap();
        let mut rows: Vec<_> = roles
            .iter()
            .filter(|((g, _), _)| *g == guild)
            .map(|((_, role), threshold)| (*role, *threshold))
            .collect();
        rows.sort_unstable();
        Ok(rows)
    }

    async fn load_scores(&self, guild: GuildId) -> Result<Vec<(UserId, u64)>> {
        self.check()?;
        let scores = self.scores.lock().unwrap();
        let mut rows: Vec<_> = scores
            .iter()
            .filter(|((g, _), _)| *g == guild)
            .map(|((_, user), score)| (*user, *score))
            .collect();
        rows.sort_unstable();
        Ok(rows)
    }

    async fn upsert_role(&self, guild: GuildId, role: RoleId, threshold: u64) -> Result<()> {
        self.check()?;
        self.seed_role(guild, role, threshold);
        Ok(())
    }

    async fn upsert_score(&self, guild: GuildId, user: UserId, score: u64) -> Result<()> {
        self.check()?;
        let delay = *self.score_delay.lock().unwrap();
        if !delay.is_zero() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.seed_score(guild, user, score);
        Ok(())
    }

    async fn delete_roles(&self, guild: GuildId, roles: &[RoleId]) -> Result<()> {
        self.check()?;
        let mut table = self.roles.lock().unwrap();
        for role in roles {
            table.remove(&(guild, *role));
        }
        Ok(())
    }

    async fn delete_scores(&self, guild: GuildId, users: &[UserId]) -> Result<()> {
        self.check()?;
        let mut table = self.scores.lock().unwrap();
        for user in users {
            table.remove(&(guild, *user));
        }
        Ok(())
    }
}

/// A service with [`GUILD`] loaded.
pub struct Fixture {
    pub directory: Arc<LocalDirectory>,
    pub mutator: Arc<RecordingMutator>,
    pub store: Arc<MemoryStore>,
    pub service: Arc<AutoRoles>,
}

impl Fixture {
    /// `rungs` are stored thresholds, `scores` stored scores, and `held`
    /// the roles members already have. Roles A..D always exist.
    pub async fn build(
        policy: GrandfatherPolicy,
        rungs: &[(u64, RoleId)],
        scores: &[(u64, u64)],
        held: &[(u64, &[RoleId])],
    ) -> Fixture {
        let directory = Arc::new(LocalDirectory::new());
        let store = Arc::new(MemoryStore::default());

        let mut roles: BTreeSet<RoleId> = [A, B, C, D].into_iter().collect();
        let mut members: BTreeMap<UserId, Vec<RoleId>> = BTreeMap::new();
        for &(user, score) in scores {
            members.entry(UserId(user)).or_default();
            store.seed_score(GUILD, UserId(user), score);
        }
        for &(user, have) in held {
            roles.extend(have.iter().copied());
            members.entry(UserId(user)).or_default().extend_from_slice(have);
        }
        for &(threshold, role) in rungs {
            store.seed_role(GUILD, role, threshold);
        }

        directory.apply(&GatewayEvent::GuildAvailable {
            guild_id: GUILD,
            roles: roles.into_iter().collect(),
            members: members
                .into_iter()
                .map(|(user_id, roles)| MemberSnapshot {
                    user_id,
                    bot: false,
                    roles,
                })
                .collect(),
        });

        let mutator = Arc::new(RecordingMutator::new(Arc::clone(&directory)));
        let service = Arc::new(AutoRoles::new(
            directory.clone(),
            mutator.clone(),
            store.clone(),
            policy,
        ));
        service.load_guild(GUILD).await.unwrap();

        Fixture {
            directory,
            mutator,
            store,
            service,
        }
    }
}

/// Default policy, empty ladder.
pub async fn fixture(scores: &[(u64, u64)], held: &[(u64, &[RoleId])]) -> Fixture {
    Fixture::build(GrandfatherPolicy::default(), &[], scores, held).await
}
