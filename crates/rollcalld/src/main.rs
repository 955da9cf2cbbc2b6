use anyhow::{Context, Result};
use rollcall_store::LocalStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::load()?;
    tracing::info!(db = %config.db_path.display(), "rollcalld starting");

    let store = Arc::new(LocalStore::open(&config.db_path).await?);
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("binding {}", config.listen_addr()))?;
    tracing::info!(addr = %listener.local_addr()?, "rollcalld ready");

    server::serve(store, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
    })
    .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
