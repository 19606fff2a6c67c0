//! HTTP surface
//!
//! Mounts the feature routers under `/api/v1` and wraps everything in the
//! compression, tracing and CORS layers.

pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, FeatureState};
use crate::ingest::store::JobLogStore;
use crate::middleware;

pub fn create_router(state: FeatureState, config: &Config) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health))
        .with_state(state.logs.clone());

    Router::new()
        .route("/", get(root))
        .merge(health_routes)
        .nest("/api/v1", features::router(state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Fundsync Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Store connectivity check
async fn health(State(logs): State<Arc<dyn JobLogStore>>) -> Response {
    match logs.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
                .into_response()
        },
    }
}
