use std::net::SocketAddr;

use anyhow::Result;
use concierge_api::{build_app_with, ApiConfig};
use concierge_observability::init_tracing;
use concierge_providers::{ProviderConfig, Providers};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("concierge_api");

    let config = ApiConfig::from_env();
    let bind = config.bind.clone();
    let providers = Providers::from_config(ProviderConfig::from_env())?;

    let app = build_app_with(config, providers).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "stay concierge api started");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
