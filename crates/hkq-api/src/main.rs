//! HKQ API Server
//!
//! Serves the intent-to-SPARQL pipeline over HTTP.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use hkq_api::{create_router, state::AppState};
use hkq_core::AppConfig;
use hkq_pipeline::QueryPipeline;
use hkq_store::SparqlHttpStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: file (HKQ_CONFIG) overridden by env, or env alone
    let config = match std::env::var("HKQ_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => AppConfig::from_env().context("loading configuration from environment")?,
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hkq_api={0},hkq_pipeline={0},hkq_store={0},tower_http=debug", config.logging.level)
            .into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location);
    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    // Graph store and pipeline
    let store = SparqlHttpStore::from_config(&config.store)?;
    tracing::info!(endpoint = store.endpoint(), "Using SPARQL endpoint");
    let pipeline = QueryPipeline::from_config(&config, Arc::new(store))?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, pipeline));
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HKQ API Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
