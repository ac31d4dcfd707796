use anyhow::Result;
use swarm_core::{api::ApiServer, config::BrokerConfig, store::ConfigStore, store::Database};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Stored config entries may hold integration secrets, so import them
    // before reading the environment-derived config.
    let bootstrap = BrokerConfig::from_env()?;
    let db = Database::open_and_migrate(bootstrap.database_path.clone()).await?;
    ConfigStore::new(db.clone()).import_env().await?;

    let config = BrokerConfig::from_env()?;
    info!("starting swarm broker");

    let api_server = ApiServer::new(config, db);
    api_server.run().await?;

    Ok(())
}
