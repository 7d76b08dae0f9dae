use std::sync::Arc;
use std::time::Duration;

use api_lib::{
    config::Config,
    web::{build_router, state::AppState},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use summary_stream_core::{
    Aggregator, InMemoryPersistence, PersistenceService, Persona, PortResult, SectionResult,
    SummarizationService, SummaryPipeline,
};
use tower::ServiceExt;
use tracing::Level;
use uuid::Uuid;

/// Echoes the first sentence of each section back as its summary.
struct EchoBackend;

#[async_trait]
impl SummarizationService for EchoBackend {
    async fn summarize_section(&self, text: &str, _persona: Persona) -> PortResult<SectionResult> {
        let first = text.split('.').next().unwrap_or(text).trim();
        Ok(SectionResult::new(format!("{}.", first))
            .with_bullets(vec![first.to_string()])
            .with_confidence(0.9))
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: None,
        log_level: Level::INFO,
        openai_api_key: None,
        summary_model: "test-model".to_string(),
        section_max_words: 12,
        brief_overview_words: 50,
        strict_invariants: true,
        backend_max_attempts: 1,
        persist_max_attempts: 2,
        max_concurrent_sections: 4,
        stale_after: Duration::from_secs(3600),
        tombstone_retention: Duration::from_secs(600),
        evict_after: None,
    }
}

fn app() -> (Router, Arc<AppState>) {
    let config = Arc::new(test_config());
    let persistence: Arc<dyn PersistenceService> = Arc::new(InMemoryPersistence::new());
    let aggregator = Arc::new(Aggregator::new(persistence, config.aggregator_options()));
    let pipeline = SummaryPipeline::new(aggregator, Arc::new(EchoBackend), config.pipeline_options());
    let state = Arc::new(AppState::new(pipeline, config));
    (build_router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_until_completed(app: &Router, id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/summaries/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let summary: Value = serde_json::from_slice(&body).unwrap();
        if summary["status"] == "COMPLETED" {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("summary {id} never completed");
}

const TEXT: &str = "Rust has no garbage collector. It relies on ownership instead.\n\n\
                    Borrowing lets code read data without taking it. The checker enforces this.\n\n\
                    Async tasks run on an executor. Tokio is a popular choice.";

#[tokio::test]
async fn created_summary_completes_in_section_order() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        json_request("POST", "/summaries", json!({ "text": TEXT, "persona": "student" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let placeholder: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(placeholder["status"], "PENDING");
    assert_eq!(placeholder["persona"], "student");
    assert_eq!(placeholder["total_sections"], 3);

    let id = placeholder["id"].as_str().unwrap().to_string();
    let summary = wait_until_completed(&app, &id).await;
    assert_eq!(
        summary["detailed_summary"],
        "Rust has no garbage collector.\n\nBorrowing lets code read data without taking it.\n\nAsync tasks run on an executor."
    );
    assert_eq!(summary["key_insights"].as_array().unwrap().len(), 3);
    assert_eq!(summary["has_partial_content"], false);

    let (status, body) = send(&app, get(&format!("/summaries/{id}/sections"))).await;
    assert_eq!(status, StatusCode::OK);
    let sections: Value = serde_json::from_slice(&body).unwrap();
    let indices: Vec<u64> = sections
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let (status, body) = send(&app, get("/summaries")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (app, state) = app();
    let (status, _) = send(&app, json_request("POST", "/summaries", json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("POST", "/summaries", json!({ "text": TEXT, "persona": "pirate" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.aggregator().list_documents().is_empty());

    let unknown = Uuid::new_v4();
    let (status, _) = send(&app, get(&format!("/summaries/{unknown}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get(&format!("/summaries/{unknown}/progress"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/summaries/{unknown}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn favorite_and_delete_round_trip() {
    let (app, _) = app();
    let (_, body) = send(&app, json_request("POST", "/summaries", json!({ "text": TEXT }))).await;
    let id = serde_json::from_slice::<Value>(&body).unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_until_completed(&app, &id).await;

    let (status, body) = send(
        &app,
        json_request("PUT", &format!("/summaries/{id}/favorite"), json!({ "favorite": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["favorite"], true);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/summaries/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get(&format!("/summaries/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_stream_ends_with_the_finished_snapshot() {
    let (app, _) = app();
    let (_, body) = send(&app, json_request("POST", "/summaries", json!({ "text": TEXT }))).await;
    let id = serde_json::from_slice::<Value>(&body).unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_until_completed(&app, &id).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/summaries/{id}/progress")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream did not end")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: progress"));
    assert!(text.contains("\"status\":\"COMPLETED\""));
}

#[tokio::test]
async fn evicted_summary_is_listed_and_served_from_storage() {
    let (app, state) = app();
    let (_, body) = send(&app, json_request("POST", "/summaries", json!({ "text": TEXT }))).await;
    let id = serde_json::from_slice::<Value>(&body).unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let finished = wait_until_completed(&app, &id).await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let evicted = state
        .aggregator()
        .evict_idle(chrono::Duration::milliseconds(1))
        .await;
    assert_eq!(evicted.len(), 1);
    assert!(state.aggregator().list_documents().is_empty());

    let (status, body) = send(&app, get("/summaries")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());

    let (status, body) = send(&app, get(&format!("/summaries/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let restored: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(restored["detailed_summary"], finished["detailed_summary"]);
    assert_eq!(state.aggregator().list_documents().len(), 1);
}
