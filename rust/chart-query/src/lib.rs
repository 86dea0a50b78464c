pub mod aggregate;
pub mod config;
pub mod error;
pub mod filter;
pub mod normalize;
pub mod pagination;
pub mod property;
pub mod remote;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the chart query service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
