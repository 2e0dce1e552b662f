use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{Agent, AgentContext, AgentError, AgentResult};
use crate::tools::ToolRequest;
use crate::types::{AgentKind, Finding, FindingData, NewsItem};

/// Longest snippet kept per news item, in characters
const MAX_SNIPPET_CHARS: usize = 300;

pub fn research_query(topic: &str) -> String {
    format!("{} latest news press release product launch", topic)
}

/// Broader query used by Manager follow-ups, so a re-dispatch does not
/// replay the cached first answer.
pub fn follow_up_query(topic: &str) -> String {
    format!("{} news announcements partnerships competitors", topic)
}

/// Finds recent news, press releases and product launches for the topic.
#[derive(Debug, Default)]
pub struct NewsResearcher;

#[async_trait]
impl Agent for NewsResearcher {
    fn kind(&self) -> AgentKind {
        AgentKind::NewsResearcher
    }

    async fn produce(&self, ctx: &AgentContext, _upstream: &[Finding]) -> AgentResult {
        let query = if ctx.task.essential {
            research_query(&ctx.topic)
        } else {
            follow_up_query(&ctx.topic)
        };
        let request = ToolRequest::search(&query);
        let (outcome, record) = ctx.gateway.invoke(&request, &ctx.cancel).await;
        let payload = match outcome {
            Ok(payload) => payload,
            Err(error) => {
                return Err(AgentError {
                    error,
                    tool_calls: vec![record],
                });
            }
        };

        let items = normalize_news(&payload);
        let low_confidence = payload.get("mock").and_then(Value::as_bool).unwrap_or(false);
        if items.is_empty() {
            tracing::warn!(session_id = %ctx.session_id, topic = %ctx.topic, "search returned no usable results");
        }

        Ok(Finding {
            agent: AgentKind::NewsResearcher,
            summary: format!("Found {} news items for {}.", items.len(), ctx.topic),
            data: FindingData::News {
                query: request.query,
                items,
            },
            low_confidence,
            tool_calls: vec![record],
        })
    }
}

/// Map provider hits to news items, dropping entries without a URL.
pub fn normalize_news(payload: &Value) -> Vec<NewsItem> {
    let Some(results) = payload.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|hit| {
            let url = hit.get("url").and_then(Value::as_str)?.trim();
            if url.is_empty() {
                return None;
            }
            let title = hit
                .get("title")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("(untitled)");
            let snippet = hit
                .get("snippet")
                .or_else(|| hit.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            Some(NewsItem {
                title: title.to_string(),
                snippet: snippet.chars().take(MAX_SNIPPET_CHARS).collect(),
                url: url.to_string(),
                published_at: hit
                    .get("published_at")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_drops_entries_without_url() {
        let payload = json!({
            "results": [
                {"title": "Launch", "snippet": "New product", "url": "https://a.example", "published_at": "2024-01-02"},
                {"title": "No link", "snippet": "dropped", "url": ""},
                {"title": "Missing link"},
                {"title": "", "content": "fallback field", "url": "https://b.example"},
            ]
        });

        let items = normalize_news(&payload);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].published_at.as_deref(), Some("2024-01-02"));
        assert_eq!(items[1].title, "(untitled)");
        assert_eq!(items[1].snippet, "fallback field");
    }

    #[test]
    fn test_normalize_truncates_snippets() {
        let long = "x".repeat(1000);
        let payload = json!({"results": [{"title": "t", "snippet": long, "url": "https://a.example"}]});
        assert_eq!(normalize_news(&payload)[0].snippet.len(), MAX_SNIPPET_CHARS);
    }

    #[test]
    fn test_research_query() {
        assert_eq!(
            research_query("Competitor X"),
            "Competitor X latest news press release product launch"
        );
    }

    #[test]
    fn test_follow_up_query_differs() {
        assert_ne!(research_query("Acme"), follow_up_query("Acme"));
        assert!(follow_up_query("Acme").starts_with("Acme "));
    }
}
