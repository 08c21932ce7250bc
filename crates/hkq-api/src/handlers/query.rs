//! Query, compile and resolve handlers
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use hkq_core::{NormalizedResult, OutputVariable, QueryRequest, Resolution, SlotValue};
use hkq_pipeline::CompileOutcome;

use super::parse_language;
use crate::error::AppError;
use crate::state::AppState;

/// Query request body
#[derive(Debug, Deserialize)]
pub struct QueryBody {
    /// Canonical intent, e.g. "query_health_facilities"
    pub intent: String,

    /// Language tag of the turn ("sw", "fr", "en")
    pub language: String,

    /// Extracted slots in mention order
    #[serde(default)]
    pub slots: Vec<SlotValue>,

    /// Include the rendered reply text
    #[serde(default = "default_true")]
    pub render: bool,
}

fn default_true() -> bool {
    true
}

impl QueryBody {
    fn into_request(self) -> Result<QueryRequest, AppError> {
        let language = parse_language(&self.language)?;
        Ok(QueryRequest {
            intent: self.intent,
            language,
            slots: self.slots,
        })
    }
}

/// Query response body
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub result: NormalizedResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Run one conversational turn against the graph store
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, AppError> {
    state.increment_requests();
    let render = body.render;
    let request = body.into_request()?;

    let result = state.pipeline.handle(&request).await?;
    let message = if render {
        Some(
            state
                .pipeline
                .render(&request.intent, &result, request.language)?,
        )
    } else {
        None
    };

    Ok(Json(QueryResponse { result, message }))
}

/// Compile response body
#[derive(Debug, Serialize)]
pub struct CompileResponse {
    #[serde(flatten)]
    pub outcome: CompileOutcome,

    /// Output variables of the compiled query, when one was produced
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<OutputVariable>,
}

/// Resolve and compile without touching the store
pub async fn compile_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<CompileResponse>, AppError> {
    state.increment_requests();
    let request = body.into_request()?;

    let outcome = state.pipeline.compile_only(&request)?;
    let output = match &outcome {
        CompileOutcome::Compiled { query } => {
            debug!(intent = %query.intent, fingerprint = query.fingerprint(), "Compiled");
            query.output.clone()
        }
        _ => Vec::new(),
    };

    Ok(Json(CompileResponse { outcome, output }))
}

/// Resolve request body
#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub language: String,
    pub text: String,
    /// Restrict candidates to instances of this class (or its subclasses)
    #[serde(default)]
    pub class: Option<String>,
}

/// Resolve a single mention against the label index
pub async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<Resolution>, AppError> {
    state.increment_requests();
    let language = parse_language(&body.language)?;
    let resolution = state
        .pipeline
        .resolve_mention(language, &body.text, body.class.as_deref())?;
    Ok(Json(resolution))
}
