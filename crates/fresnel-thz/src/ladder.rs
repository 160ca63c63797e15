//! Threshold-indexed role ladder.
//!
//! Each guild registers a set of `(threshold, role)` rungs. A member's
//! derived role is the rung with the greatest threshold at or below
//! their THz score.
//!
//! Three views are kept in lockstep:
//! - `thresholds`: ascending, used for binary search
//! - `by_threshold`: threshold → role
//! - `by_role`: role → threshold
//!
//! `thresholds` is always exactly the sorted key set of `by_threshold`,
//! and `by_threshold` / `by_role` are always inverse maps.

use crate::{LadderError, RoleId};
use std::collections::HashMap;

/// Ordered bidirectional mapping between score thresholds and roles.
#[derive(Debug, Clone, Default)]
pub struct ThresholdIndex {
    thresholds: Vec<u64>,
    by_threshold: HashMap<u64, RoleId>,
    by_role: HashMap<RoleId, u64>,
}

impl ThresholdIndex {
    /// Create an empty ladder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ladder from persisted rows.
    ///
    /// Rows that collide with an earlier row (same threshold) are
    /// returned so the caller can purge them.
    pub fn from_rows<I>(rows: I) -> (Self, Vec<(RoleId, u64)>)
    where
        I: IntoIterator<Item = (RoleId, u64)>,
    {
        let mut index = Self::new();
        let mut rejected = Vec::new();
        for (role, threshold) in rows {
            if index.add(threshold, role).is_err() {
                rejected.push((role, threshold));
            }
        }
        (index, rejected)
    }

    /// Register `role` at `threshold`.
    ///
    /// If the role is already registered elsewhere it is moved, and the
    /// previous threshold is returned. Fails without touching the index
    /// if any role (including `role` itself) already holds `threshold`.
    pub fn add(&mut self, threshold: u64, role: RoleId) -> Result<Option<u64>, LadderError> {
        if let Some(&existing) = self.by_threshold.get(&threshold) {
            return Err(LadderError::DuplicateThreshold { threshold, existing });
        }

        let previous = self.by_role.remove(&role);
        if let Some(old) = previous {
            self.by_threshold.remove(&old);
            self.remove_sorted(old);
        }

        self.by_role.insert(role, threshold);
        self.by_threshold.insert(threshold, role);
        let pos = self.thresholds.partition_point(|&t| t < threshold);
        self.thresholds.insert(pos, threshold);

        Ok(previous)
    }

    /// Unregister `role`, returning the threshold it held.
    pub fn remove(&mut self, role: RoleId) -> Result<u64, LadderError> {
        let threshold = self.by_role.remove(&role).ok_or(LadderError::NotFound(role))?;
        self.by_threshold.remove(&threshold);
        self.remove_sorted(threshold);
        Ok(threshold)
    }

    fn remove_sorted(&mut self, threshold: u64) {
        if let Ok(pos) = self.thresholds.binary_search(&threshold) {
            self.thresholds.remove(pos);
        }
    }

    /// Role with the greatest threshold `<= score`.
    pub fn nearest_at_or_below(&self, score: u64) -> Option<RoleId> {
        let pos = self.thresholds.partition_point(|&t| t <= score);
        let threshold = pos.checked_sub(1).and_then(|i| self.thresholds.get(i))?;
        self.by_threshold.get(threshold).copied()
    }

    /// Whether some role is registered at exactly `threshold`.
    pub fn has_threshold(&self, threshold: u64) -> bool {
        self.by_threshold.contains_key(&threshold)
    }

    /// Whether `role` is managed by this ladder.
    pub fn contains_role(&self, role: RoleId) -> bool {
        self.by_role.contains_key(&role)
    }

    /// Threshold of a registered role.
    pub fn threshold_of(&self, role: RoleId) -> Option<u64> {
        self.by_role.get(&role).copied()
    }

    /// Role registered at exactly `threshold`.
    pub fn role_at(&self, threshold: u64) -> Option<RoleId> {
        self.by_threshold.get(&threshold).copied()
    }

    /// The managed roles among `candidates`, in the order given.
    pub fn role_ids_in<'a, I>(&self, candidates: I) -> Vec<RoleId>
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        candidates
            .into_iter()
            .copied()
            .filter(|role| self.contains_role(*role))
            .collect()
    }

    /// Among `candidates`, the managed role with the greatest threshold.
    pub fn highest_held<'a, I>(&self, candidates: I) -> Option<RoleId>
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        candidates
            .into_iter()
            .filter_map(|role| self.threshold_of(*role).map(|t| (t, *role)))
            .max_by_key(|(t, _)| *t)
            .map(|(_, role)| role)
    }

    /// Highest rung, if any.
    pub fn top(&self) -> Option<(u64, RoleId)> {
        let threshold = *self.thresholds.last()?;
        self.role_at(threshold).map(|role| (threshold, role))
    }

    /// Rungs in ascending threshold order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, RoleId)> + '_ {
        self.thresholds
            .iter()
            .filter_map(|t| self.by_threshold.get(t).map(|role| (*t, *role)))
    }

    /// Ascending thresholds.
    pub fn thresholds(&self) -> &[u64] {
        &self.thresholds
    }

    /// Every managed role, unordered.
    pub fn roles(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.by_role.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: RoleId = RoleId(1);
    const B: RoleId = RoleId(2);
    const C: RoleId = RoleId(3);

    fn abc() -> ThresholdIndex {
        let mut index = ThresholdIndex::new();
        index.add(0, A).unwrap();
        index.add(100, B).unwrap();
        index.add(500, C).unwrap();
        index
    }

    #[test]
    fn nearest_picks_greatest_at_or_below() {
        let index = abc();
        assert_eq!(index.nearest_at_or_below(0), Some(A));
        assert_eq!(index.nearest_at_or_below(99), Some(A));
        assert_eq!(index.nearest_at_or_below(100), Some(B));
        assert_eq!(index.nearest_at_or_below(150), Some(B));
        assert_eq!(index.nearest_at_or_below(500), Some(C));
        assert_eq!(index.nearest_at_or_below(u64::MAX), Some(C));
    }

    #[test]
    fn nearest_on_empty_or_all_above() {
        assert_eq!(ThresholdIndex::new().nearest_at_or_below(10), None);

        let mut index = ThresholdIndex::new();
        index.add(50, A).unwrap();
        assert_eq!(index.nearest_at_or_below(49), None);
    }

    #[test]
    fn duplicate_threshold_leaves_index_unchanged() {
        let mut index = abc();
        let err = index.add(100, RoleId(9)).unwrap_err();
        assert_eq!(
            err,
            LadderError::DuplicateThreshold { threshold: 100, existing: B }
        );
        assert_eq!(index.thresholds(), &[0, 100, 500]);
        assert!(!index.contains_role(RoleId(9)));
    }

    #[test]
    fn readding_same_pair_is_duplicate() {
        let mut index = abc();
        assert!(index.add(100, B).is_err());
        assert_eq!(index.threshold_of(B), Some(100));
    }

    #[test]
    fn add_existing_role_moves_it() {
        let mut index = abc();
        assert_eq!(index.add(300, B).unwrap(), Some(100));
        assert_eq!(index.thresholds(), &[0, 300, 500]);
        assert!(!index.has_threshold(100));
        assert_eq!(index.role_at(300), Some(B));
        assert_eq!(index.nearest_at_or_below(150), Some(A));
    }

    #[test]
    fn remove_absent_is_not_found() {
        let mut index = abc();
        assert_eq!(index.remove(RoleId(9)), Err(LadderError::NotFound(RoleId(9))));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn remove_drops_both_directions() {
        let mut index = abc();
        assert_eq!(index.remove(B), Ok(100));
        assert!(!index.has_threshold(100));
        assert!(!index.contains_role(B));
        assert_eq!(index.nearest_at_or_below(150), Some(A));
    }

    #[test]
    fn highest_held_ignores_unmanaged() {
        let index = abc();
        let held = [RoleId(77), A, C, B];
        assert_eq!(index.highest_held(&held), Some(C));
        assert_eq!(index.role_ids_in(&held), vec![A, C, B]);
        assert_eq!(index.highest_held(&[RoleId(77)]), None);
    }

    #[test]
    fn from_rows_rejects_collisions() {
        let (index, rejected) = ThresholdIndex::from_rows([(A, 10), (B, 10), (C, 20)]);
        assert_eq!(index.len(), 2);
        assert_eq!(rejected, vec![(B, 10)]);
    }

    #[test]
    fn top_and_iter_are_ordered() {
        let index = abc();
        assert_eq!(index.top(), Some((500, C)));
        let rungs: Vec<_> = index.iter().collect();
        assert_eq!(rungs, vec![(0, A), (100, B), (500, C)]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u64, u64),
        Remove(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..50, 0u64..12).prop_map(|(t, r)| Op::Add(t, r)),
            (0u64..12).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn views_never_diverge(ops in prop::collection::vec(op(), 0..64), probes in prop::collection::vec(0u64..60, 0..16)) {
            let mut index = ThresholdIndex::new();
            for op in ops {
                match op {
                    Op::Add(t, r) => { let _ = index.add(t, RoleId(r)); }
                    Op::Remove(r) => { let _ = index.remove(RoleId(r)); }
                }

                let mut keys: Vec<u64> = index.by_role.values().copied().collect();
                keys.sort_unstable();
                prop_assert_eq!(index.thresholds(), keys.as_slice());
                prop_assert_eq!(index.by_role.len(), index.by_threshold.len());
                for (role, t) in &index.by_role {
                    prop_assert_eq!(index.by_threshold.get(t), Some(role));
                }
            }

            for probe in probes {
                let expected = index
                    .by_threshold
                    .iter()
                    .filter(|(t, _)| **t <= probe)
                    .max_by_key(|(t, _)| **t)
                    .map(|(_, r)| *r);
                prop_assert_eq!(index.nearest_at_or_below(probe), expected);
            }
        }
    }
}
