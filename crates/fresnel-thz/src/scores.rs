//! Per-guild cumulative THz scores.

use crate::activity::{ActivityBuffer, BASELINE_INCREMENT};
use crate::UserId;
use std::collections::HashMap;

/// One row of a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing {
    /// 1-based position.
    pub rank: usize,
    pub user: UserId,
    pub score: u64,
}

/// Mapping from member to cumulative THz.
///
/// Scores only grow through [`ScoreBook::fold`]; [`ScoreBook::set`] is
/// reserved for administrative overrides and grandfathering bumps.
#[derive(Debug, Clone, Default)]
pub struct ScoreBook {
    scores: HashMap<UserId, u64>,
}

impl ScoreBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (UserId, u64)>,
    {
        Self {
            scores: rows.into_iter().collect(),
        }
    }

    pub fn get(&self, user: UserId) -> Option<u64> {
        self.scores.get(&user).copied()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.scores.contains_key(&user)
    }

    /// Start tracking a member at zero. Returns false if already tracked.
    pub fn track(&mut self, user: UserId) -> bool {
        if self.scores.contains_key(&user) {
            return false;
        }
        self.scores.insert(user, 0);
        true
    }

    /// Overwrite a member's score, returning the previous value.
    pub fn set(&mut self, user: UserId, score: u64) -> Option<u64> {
        self.scores.insert(user, score)
    }

    /// Raise a member's score to at least `floor`. Returns true if raised.
    pub fn raise_to(&mut self, user: UserId, floor: u64) -> bool {
        let score = self.scores.entry(user).or_insert(0);
        if *score < floor {
            *score = floor;
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, user: UserId) -> Option<u64> {
        self.scores.remove(&user)
    }

    /// Fold one interval of activity into a single member's score.
    ///
    /// `delta` is the member's buffered increment, or `None` for a
    /// tracked member who stayed quiet. Returns the new score, or `None`
    /// for an untracked member with no activity.
    pub fn fold_one(&mut self, user: UserId, delta: Option<u64>) -> Option<u64> {
        let inc = match (delta, self.scores.contains_key(&user)) {
            (Some(inc), _) => inc,
            (None, true) => BASELINE_INCREMENT,
            (None, false) => return None,
        };
        let score = self.scores.entry(user).or_insert(0);
        *score = score.saturating_add(inc);
        Some(*score)
    }

    /// Fold a whole buffer, returning every touched member and their new score.
    ///
    /// Tracked members without a delta earn the baseline increment;
    /// authors seen for the first time start from zero.
    pub fn fold(&mut self, buffer: ActivityBuffer) -> Vec<(UserId, u64)> {
        let mut increments: HashMap<UserId, u64> =
            buffer.into_iter().map(|(user, delta)| (user, delta.increment())).collect();
        let mut touched: Vec<UserId> = self.scores.keys().copied().collect();
        touched.extend(increments.keys().copied().filter(|u| !self.scores.contains_key(u)));

        touched
            .into_iter()
            .filter_map(|user| {
                let delta = increments.remove(&user);
                self.fold_one(user, delta).map(|score| (user, score))
            })
            .collect()
    }

    /// Every tracked member, best first. Ties go to the higher user id.
    pub fn leaderboard(&self) -> Vec<Standing> {
        let mut ranked: Vec<(u64, UserId)> =
            self.scores.iter().map(|(user, score)| (*score, *user)).collect();
        ranked.sort_unstable_by(|a, b| b.cmp(a));
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (score, user))| Standing { rank: i + 1, user, score })
            .collect()
    }

    /// 1-based leaderboard position of a member.
    pub fn rank(&self, user: UserId) -> Option<usize> {
        let score = self.get(user)?;
        let ahead = self
            .scores
            .iter()
            .filter(|(other, s)| (**s, **other) > (score, user))
            .count();
        Some(ahead + 1)
    }

    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.scores.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, u64)> + '_ {
        self.scores.iter().map(|(user, score)| (*user, *score))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
