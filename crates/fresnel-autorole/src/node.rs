//! Fresnel node - the process entry point.
//!
//! Architecture:
//! - Single daemon process with one RocksDB database for every guild
//! - `LocalDirectory` as the membership snapshot and role-mutation outlet
//! - Unix admin socket for control commands and gateway ingress
//! - Scheduler task folding activity every tick

use crate::admin_socket::AdminSocket;
use crate::directory::LocalDirectory;
use crate::error::{Error, Result};
use crate::events::Dispatcher;
use crate::scheduler::{Scheduler, DEFAULT_INTERVAL};
use crate::service::{AutoRoles, GrandfatherPolicy};
use crate::storage::Storage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for a Fresnel node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// Admin socket path (for fresnel-admin and the gateway bridge)
    pub admin_socket: PathBuf,

    /// Allocation interval
    pub tick: Duration,

    pub grandfather: GrandfatherPolicy,
}

impl NodeConfig {
    /// Read config from `FRESNEL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let data_dir = vars
            .get("FRESNEL_DATA_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| Error::Config("FRESNEL_DATA_DIR is not set".into()))?;

        let admin_socket = vars
            .get("FRESNEL_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        let tick = match vars.get("FRESNEL_TICK_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(Error::Config(format!("invalid FRESNEL_TICK_SECS: {}", raw))),
            },
            None => DEFAULT_INTERVAL,
        };

        let grandfather = match vars.get("FRESNEL_GRANDFATHER") {
            Some(raw) => raw.parse()?,
            None => GrandfatherPolicy::default(),
        };

        Ok(Self {
            data_dir,
            admin_socket,
            tick,
            grandfather,
        })
    }
}

/// A Fresnel node instance.
pub struct FresnelNode {
    config: NodeConfig,
    dispatcher: Arc<Dispatcher>,
}

impl FresnelNode {
    /// Open storage and wire up the service.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(Storage::open(&config.data_dir)?);

        let directory = Arc::new(LocalDirectory::new());
        let service = Arc::new(AutoRoles::new(
            directory.clone(),
            directory.clone(),
            storage,
            config.grandfather,
        ));
        let dispatcher = Arc::new(Dispatcher::new(directory, service));

        Ok(Self { config, dispatcher })
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Run until ctrl-c. An in-flight tick is allowed to finish.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Fresnel node starting");
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!("  Tick: {}s", self.config.tick.as_secs());
        tracing::info!("  Grandfather: {}", self.config.grandfather);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let admin_socket = AdminSocket::new(self.dispatcher(), self.config.admin_socket.clone());
        let admin_rx = shutdown_rx.clone();
        let admin = tokio::spawn(async move {
            if let Err(e) = admin_socket.run(admin_rx).await {
                tracing::error!("Admin socket error: {}", e);
            }
        });

        let scheduler = Scheduler::new(Arc::clone(self.dispatcher.service()), self.config.tick)
            .spawn(shutdown_rx);

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(true);

        if let Err(e) = scheduler.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
        if let Err(e) = admin.await {
            tracing::error!("Admin socket task failed: {}", e);
        }
        Ok(())
    }
}
