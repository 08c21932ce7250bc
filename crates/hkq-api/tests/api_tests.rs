//! API Integration Tests
//!
//! The router runs against the bundled ontology and catalog with a scripted
//! executor in place of a SPARQL endpoint.
//!
//! Author: hephaex@gmail.com

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use hkq_api::{create_router, state::AppState};
use hkq_core::{
    AppConfig, BindingSet, BindingValue, CompiledQuery, QueryExecutor, StoreError,
};
use hkq_pipeline::QueryPipeline;

const NS: &str = "http://example.org/humanitarian#";

struct ScriptedExecutor {
    outcome: Result<BindingSet, StoreError>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &CompiledQuery) -> Result<BindingSet, StoreError> {
        self.seen.lock().unwrap().push(query.text.clone());
        self.outcome.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn app_with(outcome: Result<BindingSet, StoreError>) -> (Router, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor {
        outcome,
        seen: Mutex::new(Vec::new()),
    });
    let config = AppConfig::default();
    let pipeline = QueryPipeline::from_config(&config, executor.clone()).unwrap();
    let state = Arc::new(AppState::new(config, pipeline));
    (create_router(state), executor)
}

fn goma_clinic() -> BindingSet {
    BindingSet::new(vec!["facility".into(), "location".into()]).with_row([
        ("facility", BindingValue::iri(format!("{NS}clinic_goma"))),
        ("location", BindingValue::iri(format!("{NS}location_goma"))),
    ])
}

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["executor"], "scripted");
    assert_eq!(json["ontology"]["templates"], 7);
    assert!(json["ontology"]["entities"].as_u64().unwrap() > 0);
    assert_eq!(json["ontology"]["languages"], json!(["sw", "fr", "en"]));
}

// =============================================================================
// Query Tests
// =============================================================================

#[tokio::test]
async fn test_query_returns_facts_and_rendered_reply() {
    let (app, executor) = app_with(Ok(goma_clinic()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({
                "intent": "query_health_facilities",
                "language": "sw",
                "slots": [{ "role": "location", "text": "Goma" }]
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "facts");
    assert_eq!(json["truncated"], false);
    assert_eq!(json["rows"].as_array().unwrap().len(), 1);
    assert_eq!(
        json["message"],
        "Hii ni vituo vya afya vilivyopo:\n- clinic_goma (Goma)"
    );
    assert_eq!(executor.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_query_without_render() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({
                "intent": "query_water_sources",
                "language": "fr",
                "render": false
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "no_results");
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn test_query_clarification_skips_the_store() {
    let (app, executor) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({
                "intent": "query_camp_status",
                "language": "fr",
                "slots": [{ "role": "camp", "text": "Bulengo" }]
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "clarification");
    assert_eq!(json["slot"], "camp");
    assert_eq!(json["candidates"].as_array().unwrap().len(), 2);
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Plusieurs camps correspondent."));
    assert!(executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_intent() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({ "intent": "order_pizza", "language": "en" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "UNKNOWN_INTENT");
}

#[tokio::test]
async fn test_unsupported_language() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({ "intent": "query_camps", "language": "ln" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "UNSUPPORTED_LANGUAGE");
}

#[tokio::test]
async fn test_query_invalid_json() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/query")
        .header("Content-Type", "application/json")
        .body(Body::from("{invalid json}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_store_failures_map_to_gateway_statuses() {
    let body = json!({
        "intent": "query_health_facilities",
        "language": "en",
        "slots": [{ "role": "location", "text": "Goma" }]
    });

    let (app, _) = app_with(Err(StoreError::Timeout(std::time::Duration::from_secs(10))));
    let (status, json) = send(
        app,
        create_json_request("POST", "/api/v1/query", Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["code"], "STORE_TIMEOUT");

    let (app, _) = app_with(Err(StoreError::Connection("refused".into())));
    let (status, json) = send(
        app,
        create_json_request("POST", "/api/v1/query", Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "STORE_UNAVAILABLE");

    let (app, _) = app_with(Err(StoreError::MalformedQuery("line 3".into())));
    let (status, json) = send(
        app,
        create_json_request("POST", "/api/v1/query", Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "MALFORMED_QUERY");
    assert_eq!(json["details"], "line 3");
}

// =============================================================================
// Compile / Resolve Tests
// =============================================================================

#[tokio::test]
async fn test_compile_does_not_execute() {
    let (app, executor) = app_with(Ok(goma_clinic()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/compile",
            Some(json!({
                "intent": "query_health_facilities",
                "language": "en",
                "slots": [{ "role": "location", "text": "Goma" }]
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "compiled");
    assert!(json["query"]["text"]
        .as_str()
        .unwrap()
        .contains("FILTER(?location = humanitarian:location_goma)"));
    assert!(!json["output"].as_array().unwrap().is_empty());
    assert!(executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_mention() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/resolve",
            Some(json!({ "language": "fr", "text": "goma", "class": "Location" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "resolved");
    assert_eq!(json["value"]["kind"], "entity");
    assert_eq!(
        json["value"]["value"]["entity"],
        format!("{NS}location_goma")
    );
}

#[tokio::test]
async fn test_resolve_unknown_class() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/resolve",
            Some(json!({ "language": "en", "text": "Goma", "class": "Spaceship" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

// =============================================================================
// Admin Tests
// =============================================================================

#[tokio::test]
async fn test_reload_from_bundled_ontology() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let (status, json) = send(app, create_json_request("POST", "/api/v1/admin/reload", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entities"], json["previous_entities"]);
    assert!(json["labels"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_404_for_unknown_route() {
    let (app, _) = app_with(Ok(BindingSet::default()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
