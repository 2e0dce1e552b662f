//! Test providers and harness builders.
//!
//! Integration tests cannot see the crate's `mockall` mocks, so the
//! providers here count their own calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use marketscout::events::SessionEvent;
use marketscout::tools::finance::MockFinance;
use marketscout::tools::search::MockSearch;
use marketscout::tools::{ProviderError, ToolProvider, ToolRegistry, ToolRequest};
use marketscout::types::ProviderKind;
use marketscout::utils::toml_config::{Backend, MarketScoutConfig};
use marketscout::{ConfigManager, DatabaseProvider, EventPayload, SessionManager, ToolGateway};

/// Wraps a provider and counts calls that reach it.
pub struct CountingProvider {
    inner: Arc<dyn ToolProvider>,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn ToolProvider>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for CountingProvider {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn backend(&self) -> &'static str {
        "counting"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call(request).await
    }
}

/// Never answers; every attempt hits the gateway timeout.
pub struct StalledProvider {
    kind: ProviderKind,
    calls: AtomicUsize,
}

impl StalledProvider {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for StalledProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn backend(&self) -> &'static str {
        "stalled"
    }

    async fn call(&self, _request: &ToolRequest) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Timeout)
    }
}

/// Answers after a fixed delay, with the offline mock payload.
pub struct SlowProvider {
    inner: Arc<dyn ToolProvider>,
    delay: Duration,
}

impl SlowProvider {
    pub fn new(inner: Arc<dyn ToolProvider>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner, delay })
    }
}

#[async_trait]
impl ToolProvider for SlowProvider {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.call(request).await
    }
}

/// Search that returns a single hit on its first call and three afterwards.
pub struct SparseSearch {
    calls: AtomicUsize,
}

impl SparseSearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for SparseSearch {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    fn backend(&self) -> &'static str {
        "sparse"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call > 0 {
            return MockSearch::new().call(request).await;
        }
        Ok(json!({
            "query": request.query,
            "results": [{
                "title": "Lone headline",
                "snippet": "Only one result so far.",
                "url": "https://news.example.com/lone",
                "published_at": null,
            }],
            "mock": false,
        }))
    }
}

/// Search whose first call returns a single hit and every later call stalls.
pub struct SparseThenStalledSearch {
    sparse: Arc<SparseSearch>,
}

impl SparseThenStalledSearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sparse: SparseSearch::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.sparse.calls()
    }
}

#[async_trait]
impl ToolProvider for SparseThenStalledSearch {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    fn backend(&self) -> &'static str {
        "sparse-then-stalled"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        if self.sparse.calls() == 0 {
            return self.sparse.call(request).await;
        }
        self.sparse.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Timeout)
    }
}

/// Config with mock backends, tight timeouts and near-instant backoff.
pub fn fast_config() -> MarketScoutConfig {
    let mut config = MarketScoutConfig::default();
    config.database.url = ":memory:".into();
    config.tools.search.backend = Backend::Mock;
    config.tools.finance.backend = Backend::Mock;
    config.tools.search.timeout_ms = 100;
    config.tools.finance.timeout_ms = 100;
    config.tools.retry.base_delay_ms = 1;
    config.tools.retry.max_delay_ms = 5;
    config.tools.retry.jitter = 0.0;
    config
}

/// Registry with the offline mocks, then `overrides` on top.
pub fn registry_with(overrides: Vec<Arc<dyn ToolProvider>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(MockSearch::new()));
    registry.register(Arc::new(MockFinance::new()));
    for provider in overrides {
        registry.register(provider);
    }
    registry
}

pub async fn session_manager(registry: ToolRegistry, config: MarketScoutConfig) -> Arc<SessionManager> {
    let repo = DatabaseProvider::Memory
        .create_repository()
        .await
        .expect("in-memory store");
    let gateway = Arc::new(ToolGateway::with_registry(registry, &config.tools));
    Arc::new(SessionManager::new(
        repo,
        gateway,
        Arc::new(ConfigManager::from_config(config)),
    ))
}

pub fn event_types(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(SessionEvent::event_type).collect()
}

/// Lifecycle events only (no `agent_output`), rendered as `type(agent)`.
pub fn lifecycle(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::AgentOutput { .. } => None,
            EventPayload::AgentStarted { agent } => Some(format!("agent_started({})", agent)),
            EventPayload::AgentFinished { agent } => Some(format!("agent_finished({})", agent)),
            EventPayload::TaskPlanned { tasks, .. } => Some(format!("task_planned({})", tasks.len())),
            other => Some(other.event_type().to_string()),
        })
        .collect()
}

pub fn position(events: &[SessionEvent], payload: &EventPayload) -> usize {
    events
        .iter()
        .position(|e| &e.payload == payload)
        .unwrap_or_else(|| panic!("missing event {:?}", payload))
}
