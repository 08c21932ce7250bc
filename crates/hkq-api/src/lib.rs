//! HKQ API - HTTP surface for the query pipeline
//!
//! Routes:
//! - `GET  /health`
//! - `POST /api/v1/query`
//! - `POST /api/v1/compile`
//! - `POST /api/v1/resolve`
//! - `POST /api/v1/admin/reload`

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use hkq_core::config::ServerConfig;

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let server = state.config.server.clone();

    let mut router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", routes::api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )));

    if server.cors_enabled {
        router = router.layer(cors_layer(&server));
    }
    router
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
