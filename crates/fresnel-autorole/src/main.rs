//! Fresnel node binary
//!
//! Keeps guild roles in step with members' THz scores.

use fresnel_autorole::{FresnelNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fresnel_node=info,fresnel_autorole=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fresnel Node");

    let config = NodeConfig::from_env()?;

    let node = FresnelNode::new(config)?;
    node.run().await?;

    Ok(())
}
