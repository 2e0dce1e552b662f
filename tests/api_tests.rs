mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};

use common::mocks::*;
use marketscout::api::routes::build_app;
use marketscout::tools::ToolRegistry;
use marketscout::types::ProviderKind;
use marketscout::utils::toml_config::MarketScoutConfig;
use marketscout::{AppState, ConfigManager, DatabaseProvider, SessionManager, ToolGateway};

struct Harness {
    server: TestServer,
    sessions: Arc<SessionManager>,
}

async fn harness_with(registry: ToolRegistry, config: MarketScoutConfig) -> Harness {
    let repo = DatabaseProvider::Memory
        .create_repository()
        .await
        .expect("in-memory store");
    let gateway = Arc::new(ToolGateway::with_registry(registry, &config.tools));
    let config_manager = Arc::new(ConfigManager::from_config(config));
    let sessions = Arc::new(SessionManager::new(repo, gateway, config_manager.clone()));

    let app = build_app(AppState {
        config_manager,
        sessions: sessions.clone(),
    });
    Harness {
        server: TestServer::new(app).expect("Failed to create test server"),
        sessions,
    }
}

async fn harness() -> Harness {
    harness_with(registry_with(vec![]), fast_config()).await
}

/// A harness whose search provider never answers, so runs stay in flight.
async fn stalled_harness() -> Harness {
    let mut config = fast_config();
    config.tools.search.timeout_ms = 60_000;
    harness_with(
        registry_with(vec![StalledProvider::new(ProviderKind::Search)]),
        config,
    )
    .await
}

async fn create(server: &TestServer, body: Value) -> String {
    let response = server.post("/api/sessions").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["sessionId"].as_str().unwrap().to_string()
}

/// `(id, event)` pairs of an SSE body
fn frames(body: &str) -> Vec<(u64, String)> {
    let mut frames = Vec::new();
    let mut id = None;
    for line in body.lines() {
        if let Some(value) = line.strip_prefix("id:") {
            id = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("event:") {
            if let Some(seq) = id.take() {
                frames.push((seq, value.trim().to_string()));
            }
        }
    }
    frames
}

// ============= Health =============

#[tokio::test]
async fn test_health_check() {
    let h = harness().await;
    let response = h.server.get("/api/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["ok"], true);
    assert!(body["time"].is_string());
}

#[tokio::test]
async fn test_diagnostics_reports_backends() {
    let h = harness().await;
    let body: Value = h.server.get("/api/diagnostics").await.json();

    assert_eq!(body["backends"]["search"], "mock");
    assert_eq!(body["backends"]["finance"], "mock");
    assert_eq!(body["provider_calls"], 0);
    assert_eq!(body["live_sessions"], 0);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let h = harness().await;
    let body: Value = h.server.get("/api-docs/openapi.json").await.json();
    assert!(body["paths"]["/api/sessions"].is_object());
}

// ============= Sessions =============

#[tokio::test]
async fn test_create_session() {
    let h = harness().await;
    let id = create(
        &h.server,
        json!({"prompt": "Generate a market report about Competitor X", "strategy": "hierarchical"}),
    )
    .await;

    let body: Value = h.server.get(&format!("/api/sessions/{}", id)).await.json();
    assert_eq!(body["session"]["id"], id.as_str());
    assert_eq!(body["session"]["status"], "created");
    assert_eq!(body["session"]["strategy"], "hierarchical");
    assert!(body["tasks"].as_array().unwrap().is_empty());
    assert!(body["report"].is_null());
}

#[tokio::test]
async fn test_create_accepts_mode_alias_and_defaults_strategy() {
    let h = harness().await;
    let id = create(&h.server, json!({"prompt": "Brief me on Acme", "mode": "hierarchical"})).await;
    let body: Value = h.server.get(&format!("/api/sessions/{}", id)).await.json();
    assert_eq!(body["session"]["strategy"], "hierarchical");

    let id = create(&h.server, json!({"prompt": "Brief me on Acme"})).await;
    let body: Value = h.server.get(&format!("/api/sessions/{}", id)).await.json();
    assert_eq!(body["session"]["strategy"], "sequential");
}

#[tokio::test]
async fn test_create_rejects_empty_prompt() {
    let h = harness().await;
    let response = h
        .server
        .post("/api/sessions")
        .json(&json!({"prompt": "   "}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().starts_with("InvalidPromptError"));
    assert_eq!(h.sessions.live_sessions(), 0);
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let h = harness().await;
    for path in ["/api/sessions/nope", "/api/sessions/nope/events"] {
        h.server
            .get(path)
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
    h.server
        .post("/api/sessions/nope/run")
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_streams_events_to_completion() {
    let h = harness().await;
    let id = create(&h.server, json!({"prompt": "Generate a market report about Competitor X"})).await;

    let response = h.server.post(&format!("/api/sessions/{}/run", id)).await;
    response.assert_status(StatusCode::ACCEPTED);
    let ack: Value = response.json();
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["sessionId"], id.as_str());

    let response = h.server.get(&format!("/api/sessions/{}/events", id)).await;
    response.assert_status_ok();
    let frames = frames(&response.text());

    let seqs: Vec<u64> = frames.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, (1..=frames.len() as u64).collect::<Vec<_>>());
    assert_eq!(frames.first().unwrap().1, "session_created");
    assert_eq!(frames.last().unwrap().1, "final_report");

    let body: Value = h.server.get(&format!("/api/sessions/{}", id)).await.json();
    assert_eq!(body["session"]["status"], "done");
    assert!(body["report"]["markdown"].as_str().unwrap().contains("Competitor X"));

    h.server
        .post(&format!("/api/sessions/{}/run", id))
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_events_resume_after_last_event_id() {
    let h = harness().await;
    let id = create(&h.server, json!({"prompt": "Brief me on Acme"})).await;
    h.sessions.run(&id).await.unwrap().await.unwrap().unwrap();

    let response = h
        .server
        .get(&format!("/api/sessions/{}/events", id))
        .add_header(
            HeaderName::from_static("last-event-id"),
            HeaderValue::from_static("3"),
        )
        .await;
    let resumed = frames(&response.text());
    assert_eq!(resumed.first().unwrap().0, 4);

    // the header wins over the query parameter
    let response = h
        .server
        .get(&format!("/api/sessions/{}/events", id))
        .add_query_param("after", 1)
        .add_header(
            HeaderName::from_static("last-event-id"),
            HeaderValue::from_static("3"),
        )
        .await;
    assert_eq!(frames(&response.text()), resumed);

    let response = h
        .server
        .get(&format!("/api/sessions/{}/events", id))
        .add_query_param("after", 1)
        .await;
    assert_eq!(frames(&response.text()).first().unwrap().0, 2);
}

#[tokio::test]
async fn test_second_run_conflicts_then_cancel() {
    let h = stalled_harness().await;
    let id = create(&h.server, json!({"prompt": "Brief me on Acme"})).await;

    h.server
        .post(&format!("/api/sessions/{}/run", id))
        .await
        .assert_status(StatusCode::ACCEPTED);
    let response = h
        .server
        .post(&format!("/api/sessions/{}/run", id))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().starts_with("SessionBusyError"));

    h.server
        .post(&format!("/api/sessions/{}/cancel", id))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        h.server.get(&format!("/api/sessions/{}/events", id)),
    )
    .await
    .expect("stream did not close");
    let text = response.text();
    assert_eq!(frames(&text).last().unwrap().1, "error");
    assert!(text.contains("CancelledError: session cancelled"));

    let body: Value = h.server.get(&format!("/api/sessions/{}", id)).await.json();
    assert_eq!(body["session"]["status"], "failed");
    assert_eq!(body["session"]["failure_reason"], "cancelled");
}

#[tokio::test]
async fn test_cancel_idle_session_is_rejected() {
    let h = harness().await;
    let id = create(&h.server, json!({"prompt": "Brief me on Acme"})).await;
    h.server
        .post(&format!("/api/sessions/{}/cancel", id))
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let h = harness().await;
    h.server
        .post("/api/sessions")
        .json(&json!({"prompt": "A".repeat(100 * 1024)}))
        .expect_failure()
        .await
        .assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.sessions.live_sessions(), 0);
}
