//! SensorThings HTTP Gateway binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sta_core::PgStore;
use sta_gateway::{create_router, AppState, Args, GatewayConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sta_gateway=info,sta_core=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let config = GatewayConfig::from(&args);

    info!(
        listen = %config.listen_addr,
        base_url = %config.engine.base_url,
        count_mode = %config.engine.count_mode,
        versioning = config.engine.versioning,
        "Starting SensorThings gateway"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections())
        .acquire_timeout(config.pool_timeout)
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    info!(
        max_connections = config.max_connections(),
        schema = %config.schema,
        "Connected to PostgreSQL"
    );

    let state = AppState::new(Arc::new(PgStore::new(pool)), config.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
