mod config;
mod routes;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, LogFormat};
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let client = config.build_client()?;
    let has_key = client.has_api_key();
    if !has_key {
        tracing::error!("FIRECRAWL_API_KEY is not set; extraction requests will fail until it is configured");
    }

    let state = Arc::new(AppState::new(Arc::new(client), has_key, config.new_schema()));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    tracing::info!(
        addr = %config.server.bind_addr,
        firecrawl = %config.firecrawl.base_url,
        max_schema_fields = config.schema.max_fields,
        "Server listening"
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
