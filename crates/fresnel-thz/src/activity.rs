//! Message-derived activity signals.
//!
//! Between two reconciliation ticks every non-bot author accrues an
//! [`ActivityDelta`]:
//!
//! - **length**: +1 per message of at least [`LONG_MESSAGE_CHARS`]
//!   characters, capped at [`MAX_LENGTH_SIGNAL`]
//! - **variety**: +1 per message using at least [`VARIETY_THRESHOLD`]
//!   distinct ASCII letters/punctuation, capped at [`MAX_VARIETY_SIGNAL`]
//!
//! Repeating the same message shape (identical length and character
//! set) [`REPEAT_LIMIT`] times in a row freezes the delta as
//! [`ActivityDelta::Suppressed`] for the rest of the interval.
//!
//! At fold time a delta is worth `1 + length + variety`, a suppressed
//! delta is worth exactly 1, and a known member with no delta also
//! earns the baseline 1.

use crate::UserId;
use std::collections::{BTreeSet, HashMap};

/// Minimum character count for a message to raise the length signal.
pub const LONG_MESSAGE_CHARS: usize = 50;

/// Distinct qualifying characters needed to raise the variety signal.
pub const VARIETY_THRESHOLD: usize = 13;

/// Cap on the length signal per interval.
pub const MAX_LENGTH_SIGNAL: u8 = 2;

/// Cap on the variety signal per interval.
pub const MAX_VARIETY_SIGNAL: u8 = 3;

/// Consecutive identical shapes that trigger suppression.
pub const REPEAT_LIMIT: u32 = 5;

/// THz every tracked member earns per interval.
pub const BASELINE_INCREMENT: u64 = 1;

/// Length and character set of a message, used to spot repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageShape {
    pub length: usize,
    pub chars: BTreeSet<char>,
}

impl MessageShape {
    pub fn of(content: &str) -> Self {
        Self {
            length: content.chars().count(),
            chars: content.chars().collect(),
        }
    }

    /// Distinct ASCII letters and punctuation in the message.
    pub fn variety(&self) -> usize {
        self.chars
            .iter()
            .filter(|c| c.is_ascii_alphabetic() || c.is_ascii_punctuation())
            .count()
    }
}

/// Pending signals for one member since the last tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityDelta {
    Active {
        length: u8,
        variety: u8,
        latest: Option<(MessageShape, u32)>,
    },
    /// Spam guard tripped; no further accrual this interval.
    Suppressed,
}

impl Default for ActivityDelta {
    fn default() -> Self {
        ActivityDelta::Active {
            length: 0,
            variety: 0,
            latest: None,
        }
    }
}

impl ActivityDelta {
    /// Fold one message into the delta.
    pub fn observe(&mut self, content: &str) {
        let shape = MessageShape::of(content);

        let suppress = match self {
            ActivityDelta::Suppressed => return,
            ActivityDelta::Active { length, variety, latest } => {
                let repeats = match latest.take() {
                    Some((prev, count)) if prev == shape => count + 1,
                    _ => 1,
                };
                if repeats >= REPEAT_LIMIT {
                    true
                } else {
                    if shape.length >= LONG_MESSAGE_CHARS {
                        *length = (*length + 1).min(MAX_LENGTH_SIGNAL);
                    }
                    if shape.variety() >= VARIETY_THRESHOLD {
                        *variety = (*variety + 1).min(MAX_VARIETY_SIGNAL);
                    }
                    *latest = Some((shape, repeats));
                    false
                }
            }
        };

        if suppress {
            *self = ActivityDelta::Suppressed;
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, ActivityDelta::Suppressed)
    }

    /// THz this delta is worth at fold time.
    pub fn increment(&self) -> u64 {
        match self {
            ActivityDelta::Active { length, variety, .. } => {
                BASELINE_INCREMENT + u64::from(*length) + u64::from(*variety)
            }
            ActivityDelta::Suppressed => BASELINE_INCREMENT,
        }
    }
}

/// One guild's pending deltas, keyed by author.
#[derive(Debug, Clone, Default)]
pub struct ActivityBuffer {
    deltas: HashMap<UserId, ActivityDelta>,
}

impl ActivityBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message from a non-bot author.
    pub fn record(&mut self, author: UserId, content: &str) {
        self.deltas.entry(author).or_default().observe(content);
    }

    pub fn get(&self, user: UserId) -> Option<&ActivityDelta> {
        self.deltas.get(&user)
    }

    /// Drop a member's pending delta.
    pub fn forget(&mut self, user: UserId) -> Option<ActivityDelta> {
        self.deltas.remove(&user)
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl IntoIterator for ActivityBuffer {
    type Item = (UserId, ActivityDelta);
    type IntoIter = std::collections::hash_map::IntoIter<UserId, ActivityDelta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.into_iter()
    }
}
