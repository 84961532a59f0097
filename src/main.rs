//! Crashline Server Binary
//!
//! Boots one table over the in-memory wallet and serves WebSocket
//! clients. Production deployments swap the wallet and reward-pool seams
//! for their real services.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crashline::network::{AuthConfig, CrashServer, ServerConfig, TableConfig, TableManager};
use crashline::wallet::{InMemoryWallet, LoggingRewardPool};
use crashline::{EngineConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Crashline Server v{VERSION}");

    let bind_addr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("invalid BIND_ADDR")?;

    let engine_config = EngineConfig {
        client_seed: std::env::var("CLIENT_SEED")
            .unwrap_or_else(|_| crashline::DEFAULT_CLIENT_SEED.to_string()),
        site_id: std::env::var("SITE_ID").unwrap_or_else(|_| "default".to_string()),
        ..EngineConfig::default()
    };

    let wallet = Arc::new(InMemoryWallet::new());
    let reward_pool = Arc::new(LoggingRewardPool);
    let tables = Arc::new(TableManager::new(wallet, reward_pool));

    let table_config = TableConfig {
        name: "main".to_string(),
        engine: engine_config,
        ..TableConfig::default()
    };
    let table_id = tables
        .create_table(table_config)
        .await
        .context("failed to start the main table")?;
    info!("main table: {}", hex::encode(table_id));

    let server = CrashServer::new(
        ServerConfig {
            bind_addr,
            auth: AuthConfig::from_env(),
            ..ServerConfig::default()
        },
        tables,
    );

    server.run().await.context("server failed")?;
    Ok(())
}
