//! SensorThings read endpoints.

use axum::{
    body::Body,
    extract::{OriginalUri, RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::debug;

use crate::error::AppError;
use crate::AppState;

/// Service root and resource routes under `prefix`.
pub fn routes(prefix: &str) -> Router<AppState> {
    let router = Router::new().route(&format!("{}/*path", prefix), get(read));
    if prefix.is_empty() {
        router.route("/", get(service_root))
    } else {
        router
            .route(prefix, get(service_root))
            .route(&format!("{}/", prefix), get(service_root))
    }
}

/// List the collections and conformance classes.
async fn service_root(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.service_root())
}

/// Answer any resource path, streaming the body as it is produced.
async fn read(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    // still percent-encoded; the resolver decodes each segment once
    let path = uri
        .path()
        .strip_prefix(state.config.route_prefix.as_str())
        .unwrap_or(uri.path());
    let query = query.unwrap_or_default();
    debug!(%path, %query, "read request");
    let response = state.engine.execute(path, &query).await?;
    Ok((
        [(header::CONTENT_TYPE, response.content_type)],
        Body::from_stream(response.body),
    )
        .into_response())
}
