//! SensorThings HTTP Gateway.
//!
//! Serves the read side of the OGC SensorThings API over HTTP, translating
//! every request into SQL against PostgreSQL through [`sta_core::Engine`]
//! and streaming the JSON response back as it is produced.

pub mod config;
pub mod error;
pub mod routes;

pub use config::{Args, GatewayConfig};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use sta_core::{Engine, Store};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Query engine.
    pub engine: Engine,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Create new application state over a store.
    pub fn new(store: Arc<dyn Store>, config: GatewayConfig) -> Self {
        let engine = Engine::new(store, config.engine.clone()).with_schema(config.schema.clone());
        Self {
            engine,
            config: Arc::new(config),
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::sta::routes(&state.config.route_prefix))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
