//! Cross-guild activity buffer with tick-time swap.

use fresnel_thz::{ActivityBuffer, GuildId, UserId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Pending activity for every guild since the last tick.
///
/// Message handling only touches this buffer, never guild state, so
/// chat traffic is not blocked by a tick or a threshold edit in flight.
#[derive(Debug, Default)]
pub struct Accumulator {
    buffers: Mutex<HashMap<GuildId, ActivityBuffer>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GuildId, ActivityBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a message from a non-bot author.
    pub fn record(&self, guild: GuildId, author: UserId, content: &str) {
        self.lock().entry(guild).or_default().record(author, content);
    }

    /// Drop a departed member's pending delta.
    pub fn forget(&self, guild: GuildId, user: UserId) {
        if let Some(buffer) = self.lock().get_mut(&guild) {
            buffer.forget(user);
        }
    }

    /// Drop everything pending for a guild.
    pub fn drop_guild(&self, guild: GuildId) {
        self.lock().remove(&guild);
    }

    /// Swap out every buffer for a fresh one.
    ///
    /// Messages arriving after this call accrue to the next tick.
    pub fn drain(&self) -> HashMap<GuildId, ActivityBuffer> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of members with a pending delta in a guild.
    pub fn pending(&self, guild: GuildId) -> usize {
        self.lock().get(&guild).map_or(0, ActivityBuffer::len)
    }
}
