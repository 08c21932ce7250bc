//! HKQ Store - SPARQL over HTTP
//!
//! Executes compiled queries against a SPARQL 1.1 Protocol endpoint
//! (Fuseki, GraphDB, Virtuoso, ...) and reads JSON results. Transient
//! failures are retried with bounded exponential backoff.
//!
//! Author: hephaex@gmail.com

pub mod results;

pub use results::parse_results;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use hkq_core::{
    BindingSet, CompiledQuery, QueryExecutor, StoreConfig, StoreError, MAX_RETRY_DELAY,
};

const SPARQL_QUERY: &str = "application/sparql-query";

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded exponential backoff for transient store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(200))
    }
}

// ============================================================================
// HTTP executor
// ============================================================================

/// SPARQL 1.1 Protocol client
pub struct SparqlHttpStore {
    client: Client,
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SparqlHttpStore {
    /// Create a store client with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    /// Create from config; `timeout_secs` bounds each attempt, not the whole retry loop
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(config.endpoint.clone(), config.attempt_timeout())?;
        Ok(store.with_retry(RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One request, no retries
    async fn send(&self, query: &CompiledQuery) -> Result<BindingSet, StoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, SPARQL_QUERY)
            .header(reqwest::header::ACCEPT, results::RESULTS_JSON)
            .body(query.text.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, detail));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        parse_results(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else if err.is_decode() {
            StoreError::InvalidResponse(err.to_string())
        } else {
            StoreError::Connection(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to a store failure
fn status_error(status: StatusCode, detail: String) -> StoreError {
    let detail = first_line(&detail);
    match status {
        StatusCode::BAD_REQUEST => StoreError::MalformedQuery(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::Connection(format!("{status}: {detail}"))
        }
        s if s.is_server_error() => StoreError::Connection(format!("{status}: {detail}")),
        s => StoreError::InvalidResponse(format!("unexpected status {s}: {detail}")),
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .chars()
        .take(300)
        .collect()
}

#[async_trait]
impl QueryExecutor for SparqlHttpStore {
    async fn execute(&self, query: &CompiledQuery) -> Result<BindingSet, StoreError> {
        let mut retry = 0;
        loop {
            match self.send(query).await {
                Ok(bindings) => {
                    debug!(
                        endpoint = %self.endpoint,
                        intent = %query.intent,
                        rows = bindings.len(),
                        retries = retry,
                        "Query executed"
                    );
                    return Ok(bindings);
                }
                Err(err) if err.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    warn!(
                        endpoint = %self.endpoint,
                        error = %err,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err @ StoreError::MalformedQuery(_)) => {
                    error!(
                        intent = %query.intent,
                        fingerprint = query.fingerprint(),
                        error = %err,
                        "Store rejected compiled query"
                    );
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        "sparql-http"
    }
}
