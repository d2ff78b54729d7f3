//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with all endpoints
//! - Request validation and the streaming conversion handlers
//! - Static handlers (greeting, health, version, debug)
//! - Request logging middleware

pub mod convert;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
