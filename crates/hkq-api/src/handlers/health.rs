//! Health check handler
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use hkq_core::Language;
use hkq_pipeline::CacheStatsReport;

use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub requests: u64,
    pub executor: String,
    pub ontology: OntologyInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStatsReport>,
}

#[derive(Serialize)]
pub struct OntologyInfo {
    pub entities: usize,
    pub labels: usize,
    pub languages: Vec<Language>,
    pub templates: usize,
}

/// Liveness check with a summary of the loaded knowledge
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let knowledge = state.pipeline.knowledge();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        requests: state.request_count(),
        executor: state.pipeline.executor_name().to_string(),
        ontology: OntologyInfo {
            entities: knowledge.schema.entity_count(),
            labels: knowledge.index.stats().labels,
            languages: knowledge.index.languages().to_vec(),
            templates: state.pipeline.templates().len(),
        },
        cache: state.pipeline.cache_report(),
    })
}
