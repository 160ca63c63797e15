//! Fresnel autorole - THz-driven role assignment
//!
//! Members earn THz for taking part in chat; every guild registers a
//! ladder of roles at THz thresholds, and the node keeps each member on
//! the highest rung their score reaches.
//!
//! # Architecture
//!
//! - **Service**: `AutoRoles`, per-guild state behind one writer lock
//! - **Reconciler**: minimal grant/revoke calls per member
//! - **Scheduler**: periodic fold of buffered activity
//! - **Storage**: RocksDB-backed role and score tables
//! - **Directory**: in-process guild snapshot fed by gateway events
//! - **Admin Socket**: Unix socket for control commands (fresnel-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use fresnel_autorole::{FresnelNode, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = FresnelNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod admin_socket;
pub mod directory;
pub mod error;
pub mod events;
pub mod node;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod storage;

#[cfg(test)]
mod testing;

pub use directory::{LocalDirectory, RoleMutation};
pub use error::{Error, Result};
pub use events::{Dispatcher, GatewayEvent, MemberSnapshot};
pub use node::{FresnelNode, NodeConfig};
pub use provider::{Membership, Persistence, RoleMutator};
pub use scheduler::Scheduler;
pub use service::{AutoRoles, GrandfatherPolicy, ScoreCard, TickReport};
pub use storage::Storage;
