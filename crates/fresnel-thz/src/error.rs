//! Error types for the THz ladder.

use crate::RoleId;
use thiserror::Error;

/// Errors from [`ThresholdIndex`](crate::ThresholdIndex) mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    /// Another role already sits at this threshold.
    #[error("threshold {threshold} is already registered to role {existing}")]
    DuplicateThreshold { threshold: u64, existing: RoleId },

    /// The role is not registered on the ladder.
    #[error("role {0} is not registered")]
    NotFound(RoleId),
}
