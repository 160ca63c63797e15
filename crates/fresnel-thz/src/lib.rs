//! Fresnel THz
//!
//! The synchronous core of Fresnel's autorole system: per-guild THz
//! scores, the threshold ladder that maps a score to a role, and the
//! message heuristics that feed scores between ticks.
//!
//! # Model
//!
//! ```text
//! messages ──► ActivityBuffer ──(tick)──► ScoreBook ──► ThresholdIndex ──► role
//!              length/variety/            cumulative     greatest threshold
//!              repeat guard               THz            at or below score
//! ```
//!
//! Nothing here performs I/O; the `fresnel-autorole` crate drives these
//! types from gateway events and a periodic scheduler.
//!
//! # Example
//!
//! ```
//! use fresnel_thz::{RoleId, ThresholdIndex};
//!
//! let mut ladder = ThresholdIndex::new();
//! ladder.add(0, RoleId(1)).unwrap();
//! ladder.add(100, RoleId(2)).unwrap();
//! ladder.add(500, RoleId(3)).unwrap();
//!
//! assert_eq!(ladder.nearest_at_or_below(150), Some(RoleId(2)));
//! assert!(ladder.add(100, RoleId(4)).is_err());
//! ```

pub mod activity;
mod error;
mod ids;
pub mod ladder;
pub mod scores;

pub use activity::{ActivityBuffer, ActivityDelta, MessageShape};
pub use error::LadderError;
pub use ids::{GuildId, RoleId, UserId};
pub use ladder::ThresholdIndex;
pub use scores::{ScoreBook, Standing};
