//! HTTP API endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chaindb_core::{KeyValueStore, StatsSnapshot, StatsSource, StoreError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub stats: Arc<dyn StatsSource>,
    pub metrics: PrometheusHandle,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/kv/:key", get(get_value).put(put_value))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Store failures rendered as JSON
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_closed() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error!(error = %self.0, "request failed");
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Response {
    let (status, label) = match state.stats.stats_snapshot() {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) if e.is_closed() => (StatusCode::SERVICE_UNAVAILABLE, "closed"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };
    let body = HealthResponse {
        status: label.to_string(),
        version: chaindb_core::VERSION.to_string(),
    };
    (status, Json(body)).into_response()
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsSnapshot>, ApiError> {
    Ok(Json(state.stats.stats_snapshot()?))
}

async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(key.as_bytes())? {
        Some(value) => Ok((StatusCode::OK, value).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.store.set(key.as_bytes(), &body)?;
    Ok(StatusCode::NO_CONTENT)
}
