//! API route definitions
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use axum::{routing::post, Router};

use crate::handlers::{admin, query};
use crate::state::AppState;

/// Create API v1 routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/query", post(query::query_handler))
        .route("/compile", post(query::compile_handler))
        .route("/resolve", post(query::resolve_handler))
        .route("/admin/reload", post(admin::reload_handler))
}
