//! Turns against a real HTTP store whose first answer is too slow

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;

use hkq_core::{AppConfig, HkqError, Language, NormalizedResult, QueryRequest, StoreError};
use hkq_pipeline::QueryPipeline;
use hkq_store::SparqlHttpStore;

const RESULTS: &str = r#"{
    "head": { "vars": ["facility", "location"] },
    "results": { "bindings": [
        {
            "facility": { "type": "uri", "value": "http://example.org/humanitarian#clinic_goma" },
            "location": { "type": "uri", "value": "http://example.org/humanitarian#location_goma" }
        }
    ] }
}"#;

/// Sleeps `slow_calls` times before answering promptly
#[derive(Clone)]
struct SlowStart {
    calls: Arc<AtomicUsize>,
    slow_calls: usize,
}

async fn select(State(mock): State<SlowStart>) -> impl IntoResponse {
    if mock.calls.fetch_add(1, Ordering::SeqCst) < mock.slow_calls {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    (StatusCode::OK, RESULTS.to_string())
}

async fn spawn_mock(mock: SlowStart) -> SocketAddr {
    let app = Router::new().route("/query", post(select)).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr, max_retries: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.store.endpoint = format!("http://{addr}/query");
    config.store.timeout_secs = 1;
    config.store.max_retries = max_retries;
    config.store.retry_backoff_ms = 10;
    config.cache.enabled = false;
    config
}

fn goma_facilities() -> QueryRequest {
    QueryRequest::new("query_health_facilities", Language::En).with_slot("location", "Goma")
}

#[tokio::test]
async fn slow_first_attempt_is_retried_within_the_turn() {
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_mock(SlowStart {
        calls: calls.clone(),
        slow_calls: 1,
    })
    .await;
    let config = config(addr, 2);
    let store = SparqlHttpStore::from_config(&config.store).unwrap();
    let pipeline = QueryPipeline::from_config(&config, Arc::new(store)).unwrap();

    let result = pipeline.handle(&goma_facilities()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let NormalizedResult::Facts { rows, .. } = result else {
        panic!("expected facts, got {result:?}");
    };
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn timeout_is_reported_once_retries_are_exhausted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_mock(SlowStart {
        calls: calls.clone(),
        slow_calls: usize::MAX,
    })
    .await;
    let config = config(addr, 1);
    let store = SparqlHttpStore::from_config(&config.store).unwrap();
    let pipeline = QueryPipeline::from_config(&config, Arc::new(store)).unwrap();

    let result = pipeline.handle(&goma_facilities()).await;

    assert!(matches!(
        result,
        Err(HkqError::Store(StoreError::Timeout(_)))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
