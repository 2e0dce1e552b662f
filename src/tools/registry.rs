use crate::types::{AppError, ProviderKind, Result};
use crate::utils::toml_config::{Backend, ToolsConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// A normalized request to one provider.
///
/// Construct through [`ToolRequest::search`] or [`ToolRequest::finance`] so that
/// equivalent queries share one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub provider: ProviderKind,
    pub query: String,
}

impl ToolRequest {
    pub fn search(query: &str) -> Self {
        Self {
            provider: ProviderKind::Search,
            query: query
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        }
    }

    pub fn finance(symbol: &str) -> Self {
        Self {
            provider: ProviderKind::Finance,
            query: symbol.trim().to_uppercase(),
        }
    }

    /// Cache key: SHA-256 of `provider|query`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.query.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Failure of a single provider attempt, classified for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transient failures are retried; everything else fails the call at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::Transport(_)
                | ProviderError::Server { .. }
                | ProviderError::RateLimited(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::Transport(_) => "transport",
            ProviderError::Server { .. } => "server",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Malformed(_) => "malformed",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status.as_u16() {
            429 => ProviderError::RateLimited(message),
            404 => ProviderError::NotFound(message),
            code if code >= 500 => ProviderError::Server {
                status: code,
                message,
            },
            _ => ProviderError::Malformed(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ProviderError::from_status(status, e.to_string());
        }
        if e.is_decode() {
            return ProviderError::InvalidResponse(e.to_string());
        }
        ProviderError::Transport(e.to_string())
    }
}

/// External data provider reachable through the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Backend label for logs (`tavily`, `alphavantage`, `mock`)
    fn backend(&self) -> &'static str;

    async fn call(&self, request: &ToolRequest) -> std::result::Result<Value, ProviderError>;
}

pub struct ToolRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ToolProvider>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with the deterministic offline providers only
    pub fn with_mock_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::tools::search::MockSearch::new()));
        registry.register(Arc::new(crate::tools::finance::MockFinance::new()));
        registry
    }

    /// Pick a backend per provider from configuration.
    ///
    /// `auto` selects the live backend when its API key is present.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::new();

        let search = &config.search;
        let search_key = resolve_key(search.backend, search.api_key_env(ProviderKind::Search));
        match search_key {
            Some(key) => registry.register(Arc::new(crate::tools::search::TavilySearch::new(
                client.clone(),
                search.base_url(ProviderKind::Search),
                key,
            ))),
            None => registry.register(Arc::new(crate::tools::search::MockSearch::new())),
        }

        let finance = &config.finance;
        let finance_key = resolve_key(finance.backend, finance.api_key_env(ProviderKind::Finance));
        match finance_key {
            Some(key) => registry.register(Arc::new(
                crate::tools::finance::AlphaVantageFinance::new(
                    client,
                    finance.base_url(ProviderKind::Finance),
                    key,
                ),
            )),
            None => registry.register(Arc::new(crate::tools::finance::MockFinance::new())),
        }

        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ToolProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Tool provider not registered: {}", kind)))
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Backend label per registered provider
    pub fn backends(&self) -> Vec<(ProviderKind, &'static str)> {
        let mut backends: Vec<_> = self
            .providers
            .iter()
            .map(|(kind, provider)| (*kind, provider.backend()))
            .collect();
        backends.sort_by_key(|(kind, _)| kind.as_str());
        backends
    }
}

fn resolve_key(backend: Backend, env_name: &str) -> Option<String> {
    match backend {
        Backend::Mock => None,
        Backend::Auto | Backend::Live => std::env::var(env_name).ok().filter(|k| !k.is_empty()),
    }
}
