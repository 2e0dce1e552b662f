//! News search providers
//!
//! [`TavilySearch`] talks to the Tavily search API. [`MockSearch`] answers
//! offline with a fixed, deterministic result set.
//!
//! Both produce the same payload shape:
//!
//! ```json
//! { "query": "...", "results": [ { "title", "snippet", "url", "published_at" } ], "mock": false }
//! ```

use crate::tools::registry::{ProviderError, ToolProvider, ToolRequest};
use crate::types::ProviderKind;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

/// Maximum results requested per search
pub const MAX_RESULTS: usize = 6;

pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TavilySearch {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

#[async_trait]
impl ToolProvider for TavilySearch {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    fn backend(&self) -> &'static str {
        "tavily"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&json!({
                "api_key": self.api_key,
                "query": request.query,
                "search_depth": "basic",
                "include_answer": false,
                "include_raw_content": false,
                "max_results": MAX_RESULTS,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let results: Vec<Value> = parsed
            .results
            .into_iter()
            .take(MAX_RESULTS)
            .map(|r| {
                json!({
                    "title": r.title,
                    "snippet": r.content,
                    "url": r.url,
                    "published_at": r.published_date,
                })
            })
            .collect();

        Ok(json!({
            "query": request.query,
            "results": results,
            "mock": false,
        }))
    }
}

/// Deterministic offline search backend.
#[derive(Debug, Default)]
pub struct MockSearch;

impl MockSearch {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolProvider for MockSearch {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    fn backend(&self) -> &'static str {
        "mock"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        if request.query.is_empty() {
            return Err(ProviderError::Malformed("empty query".into()));
        }

        let slug: String = request
            .query
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join("-");

        let headlines = [
            ("announces quarterly product roadmap", "2024-01-03"),
            ("expands partnership program", "2024-01-02"),
            ("faces new competition in core market", "2024-01-01"),
        ];
        let results: Vec<Value> = headlines
            .iter()
            .enumerate()
            .map(|(i, (headline, date))| {
                json!({
                    "title": format!("{} {}", slug, headline),
                    "snippet": format!("Offline sample result {} for \"{}\".", i + 1, request.query),
                    "url": format!("https://news.example.com/{}/{}", slug, i + 1),
                    "published_at": date,
                })
            })
            .collect();

        Ok(json!({
            "query": request.query,
            "results": results,
            "mock": true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_search_is_deterministic() {
        let provider = MockSearch::new();
        let request = ToolRequest::search("Acme latest news");
        let a = provider.call(&request).await.unwrap();
        let b = provider.call(&request).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a["results"].as_array().unwrap().len(), 3);
        assert_eq!(a["mock"], true);
        assert_eq!(a["results"][0]["url"], "https://news.example.com/acme-latest-news/1");
    }

    #[tokio::test]
    async fn test_mock_search_rejects_empty_query() {
        let err = MockSearch::new()
            .call(&ToolRequest::search(""))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
