//! Administrative handlers
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::info;

use hkq_pipeline::ReloadSummary;

use crate::error::AppError;
use crate::state::AppState;

/// Rebuild the knowledge snapshot from the configured ontology source
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadSummary>, AppError> {
    let summary = state.pipeline.reload_from_source().await?;
    info!(entities = summary.entities, "Reload requested over HTTP");
    Ok(Json(summary))
}
