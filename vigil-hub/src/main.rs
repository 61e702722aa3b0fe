/**
 * VIGIL HUB - Point d'entrée du service
 *
 * RÔLE : .env, logs, config, puis boot complet (bootstrap::start) et serveur HTTP.
 */

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_hub::bootstrap;
use vigil_hub::config::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // .env facultatif
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil_hub=info")))
        .init();

    let cfg = load_config().await;
    let bind = cfg.hub.bind.clone();

    let hub = bootstrap::start(cfg).await.context("hub bootstrap failed")?;

    let listener = TcpListener::bind(&bind).await.with_context(|| format!("cannot bind {bind}"))?;
    info!(addr = %bind, hub_id = hub.context.identity.id, "vigil hub listening");
    axum::serve(listener, hub.router).await.context("HTTP server stopped")?;
    Ok(())
}
