//! Axum router configuration

use axum::{
    http::{header, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::transcode::AudioFormat;

use super::convert::{ogg_to_mp3, ogg_to_wav};
use super::handlers::{active_conversions, health_check, not_found, root, version_check};
use super::middleware::request_logger;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/", get(root))
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/metrics", get(metrics_handler))
        // Debug endpoints
        .route("/debug/conversions", get(active_conversions))
        // Conversions
        .route(AudioFormat::Mp3.route(), post(ogg_to_mp3))
        .route(AudioFormat::Wav.route(), post(ogg_to_wav))
        .fallback(not_found)
        // Middleware
        .layer(from_fn_with_state(state.clone(), request_logger))
        .layer(TraceLayer::new_for_http());

    let router = if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH])
            .expose_headers([header::HeaderName::from_static("x-conversion-id")])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
