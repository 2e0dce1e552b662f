//! HTTP provider tests
//!
//! These tests use wiremock to stand in for the Tavily and Alpha Vantage
//! APIs and check payload mapping plus retry classification through the
//! gateway.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::mocks::*;
use marketscout::tools::finance::AlphaVantageFinance;
use marketscout::tools::search::TavilySearch;
use marketscout::tools::{ProviderError, ToolProvider, ToolRequest};
use marketscout::types::ProviderKind;
use marketscout::{AppError, ToolGateway};

fn tavily(server: &MockServer) -> Arc<TavilySearch> {
    Arc::new(TavilySearch::new(reqwest::Client::new(), server.uri(), "tvly-test"))
}

fn alphavantage(server: &MockServer) -> Arc<AlphaVantageFinance> {
    Arc::new(AlphaVantageFinance::new(reqwest::Client::new(), server.uri(), "demo"))
}

fn gateway_with(provider: Arc<dyn ToolProvider>) -> ToolGateway {
    ToolGateway::with_registry(registry_with(vec![provider]), &fast_config().tools)
}

fn overview() -> serde_json::Value {
    json!({
        "Symbol": "ACME",
        "Name": "Acme Corp",
        "Sector": "TECHNOLOGY",
        "MarketCapitalization": "1500000000",
        "PERatio": "None",
    })
}

fn daily() -> serde_json::Value {
    json!({
        "Meta Data": {"2. Symbol": "ACME"},
        "Time Series (Daily)": {
            "2024-01-03": {"4. close": "101.50"},
            "2024-01-02": {"4. close": "100.00"},
            "2024-01-04": {"4. close": "103.25"},
        }
    })
}

// ============= Tavily =============

#[tokio::test]
async fn test_tavily_maps_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({"query": "Acme latest news", "api_key": "tvly-test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "Acme latest news",
            "results": [
                {
                    "title": "Acme ships v2",
                    "url": "https://news.example.com/acme-v2",
                    "content": "Acme released the second generation.",
                    "score": 0.91,
                    "published_date": "2024-01-03"
                },
                {
                    "title": "Acme hires",
                    "url": "https://news.example.com/acme-hires",
                    "content": "Hiring spree."
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = tavily(&server)
        .call(&ToolRequest::search("Acme latest news"))
        .await
        .unwrap();

    assert_eq!(payload["mock"], false);
    let results = payload["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["snippet"], "Acme released the second generation.");
    assert_eq!(results[0]["published_at"], "2024-01-03");
    assert!(results[1]["published_at"].is_null());
    assert!(results[0].get("score").is_none());
}

#[tokio::test]
async fn test_tavily_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway_with(tavily(&server))
        .call(&ToolRequest::search("Acme"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ToolFailed { provider: ProviderKind::Search, .. }));
}

#[tokio::test]
async fn test_tavily_server_errors_retry_until_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = gateway_with(tavily(&server))
        .call(&ToolRequest::search("Acme"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "ToolUnavailableError: search");
}

#[tokio::test]
async fn test_tavily_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with(tavily(&server));
    let response = gateway
        .call(&ToolRequest::search("Acme"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.record.attempts, 2);
    assert!(!response.record.cached);
    assert_eq!(gateway.provider_calls(), 2);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let (outcome, record) = gateway_with(tavily(&server))
        .invoke(&ToolRequest::search("Acme"), &CancellationToken::new())
        .await;
    assert!(matches!(outcome, Err(AppError::ToolUnavailable(ProviderKind::Search))));
    assert_eq!(record.attempts, 3);
}

// ============= Alpha Vantage =============

#[tokio::test]
async fn test_alphavantage_combines_overview_and_series() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "OVERVIEW"))
        .and(query_param("symbol", "ACME"))
        .and(query_param("apikey", "demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(overview()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "TIME_SERIES_DAILY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(daily()))
        .mount(&server)
        .await;

    let payload = alphavantage(&server)
        .call(&ToolRequest::finance("ACME"))
        .await
        .unwrap();

    assert_eq!(payload["symbol"], "ACME");
    assert_eq!(payload["price"], 103.25);
    let dates: Vec<&str> = payload["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["date"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2024-01-02", "2024-01-03", "2024-01-04"]);
    assert_eq!(payload["metrics"]["name"], "Acme Corp");
    assert_eq!(payload["metrics"]["market_cap"], 1_500_000_000.0);
    assert!(payload["metrics"].get("pe_ratio").is_none());
}

#[tokio::test]
async fn test_alphavantage_note_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        })))
        .expect(4)
        .mount(&server)
        .await;

    let provider = alphavantage(&server);
    let err = provider.call(&ToolRequest::finance("ACME")).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited(_)));

    // one direct call plus three gateway attempts
    let err = gateway_with(provider)
        .call(&ToolRequest::finance("ACME"), &CancellationToken::new())
        .await;
    assert!(matches!(err, Err(AppError::ToolUnavailable(ProviderKind::Finance))));
}

#[tokio::test]
async fn test_alphavantage_error_message_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Error Message": "Invalid API call."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway_with(alphavantage(&server))
        .call(&ToolRequest::finance("NOPE"), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        AppError::ToolFailed { provider, reason } => {
            assert_eq!(provider, ProviderKind::Finance);
            assert!(reason.contains("Invalid API call."));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_alphavantage_empty_overview_is_unknown_symbol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "OVERVIEW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let err = alphavantage(&server)
        .call(&ToolRequest::finance("ZZZZ"))
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::NotFound("unknown symbol ZZZZ".into()));
}
