//! HTTP request handlers
//!
//! Static endpoints: greeting, health, version and debug listings.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::state::{AppState, ConversionInfo};

/// Root endpoint
pub async fn root() -> &'static str {
    "Hello World!"
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Version information endpoint
pub async fn version_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "transcoder": state.config.transcoder.program,
    }))
}

/// Running conversions
/// GET /debug/conversions
pub async fn active_conversions(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ConversionInfo>> {
    Json(state.list_conversions())
}

/// Fallback for unknown paths
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
