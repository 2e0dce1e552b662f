//! Tool Gateway
//!
//! The single path from agents to external providers. Every call goes through
//! the response cache, a per-attempt timeout and a bounded retry loop with
//! exponential backoff and jitter. Cancellation is observed while waiting on
//! the provider and while sleeping between attempts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tools::cache::{CacheStats, ToolCache};
use crate::tools::registry::{ProviderError, ToolRegistry, ToolRequest};
use crate::types::{AppError, ProviderKind, Result, ToolCallOutcome, ToolCallRecord};
use crate::utils::toml_config::{RetryConfig, ToolsConfig};

/// Retry schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);

        if self.jitter <= 0.0 || capped <= 0.0 {
            return Duration::from_millis(capped as u64);
        }
        let factor = rand::rng().random_range(-self.jitter..=self.jitter);
        Duration::from_millis((capped * (1.0 + factor)).max(0.0) as u64)
    }
}

/// Successful gateway result plus the record kept in the event log.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub payload: Value,
    pub record: ToolCallRecord,
}

pub struct ToolGateway {
    registry: ToolRegistry,
    cache: ToolCache,
    retry: RetryPolicy,
    timeouts: HashMap<ProviderKind, Duration>,
    default_timeout: Duration,
    provider_calls: AtomicU64,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry, cache: ToolCache, retry: RetryPolicy) -> Self {
        Self {
            registry,
            cache,
            retry,
            timeouts: HashMap::new(),
            default_timeout: Duration::from_secs(12),
            provider_calls: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::with_registry(ToolRegistry::from_config(config), config)
    }

    /// Gateway over an explicit registry, with cache, retry and timeouts from `config`.
    pub fn with_registry(registry: ToolRegistry, config: &ToolsConfig) -> Self {
        let mut gateway = Self::new(
            registry,
            ToolCache::new(&config.cache),
            RetryPolicy::from(&config.retry),
        );
        for kind in [ProviderKind::Search, ProviderKind::Finance] {
            gateway = gateway.with_timeout(kind, config.provider(kind).timeout());
        }
        gateway
    }

    pub fn with_timeout(mut self, kind: ProviderKind, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of attempts that actually reached a provider
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    fn timeout_for(&self, kind: ProviderKind) -> Duration {
        self.timeouts.get(&kind).copied().unwrap_or(self.default_timeout)
    }

    /// Call a provider through cache, timeout and retry.
    ///
    /// Errors:
    /// - `ToolFailed` for a non-transient provider error (no retry)
    /// - `ToolUnavailable` once every attempt failed transiently
    /// - `Cancelled` when `cancel` fires first
    pub async fn call(&self, request: &ToolRequest, cancel: &CancellationToken) -> Result<ToolResponse> {
        let (outcome, record) = self.invoke(request, cancel).await;
        outcome.map(|payload| ToolResponse { payload, record })
    }

    /// Like [`call`](Self::call), but the record is returned for failed calls too.
    pub async fn invoke(
        &self,
        request: &ToolRequest,
        cancel: &CancellationToken,
    ) -> (Result<Value>, ToolCallRecord) {
        let fingerprint = request.fingerprint();
        let mut attempts = 0;
        let mut cached = false;

        let outcome = self
            .execute(request, &fingerprint, cancel, &mut attempts, &mut cached)
            .await;

        let record = ToolCallRecord {
            provider: request.provider,
            fingerprint,
            cached,
            attempts,
            outcome: match &outcome {
                Ok(_) => ToolCallOutcome::Success,
                Err(e) => ToolCallOutcome::Failed {
                    kind: failure_kind(e).to_string(),
                },
            },
        };
        (outcome, record)
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        fingerprint: &str,
        cancel: &CancellationToken,
        attempts: &mut u32,
        cached: &mut bool,
    ) -> Result<Value> {
        let kind = request.provider;

        if request.query.is_empty() {
            return Err(AppError::ToolFailed {
                provider: kind,
                reason: ProviderError::Malformed("empty query".into()).to_string(),
            });
        }

        if let Some(payload) = self.cache.get(fingerprint) {
            debug!(provider = %kind, fingerprint = %fingerprint, "tool cache hit");
            *cached = true;
            return Ok(payload);
        }

        let provider = self.registry.get(kind)?;
        let timeout = self.timeout_for(kind);

        loop {
            *attempts += 1;
            let attempt = *attempts;
            self.provider_calls.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AppError::Cancelled(format!("{} call aborted", kind)));
                }
                result = tokio::time::timeout(timeout, provider.call(request)) => {
                    result.unwrap_or(Err(ProviderError::Timeout))
                }
            };

            match outcome {
                Ok(payload) => {
                    debug!(
                        provider = %kind,
                        backend = provider.backend(),
                        attempt,
                        "tool call succeeded"
                    );
                    self.cache.insert(fingerprint.to_string(), payload.clone());
                    return Ok(payload);
                }
                Err(e) if !e.is_transient() => {
                    warn!(provider = %kind, attempt, error = %e, "tool call failed");
                    return Err(AppError::ToolFailed {
                        provider: kind,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            provider = %kind,
                            attempts = attempt,
                            error = %e,
                            "tool unavailable after retries"
                        );
                        return Err(AppError::ToolUnavailable(kind));
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        provider = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient tool failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(AppError::Cancelled(format!("{} call aborted", kind)));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn failure_kind(error: &AppError) -> &'static str {
    match error {
        AppError::ToolUnavailable(_) => "unavailable",
        AppError::ToolFailed { .. } => "failed",
        AppError::Cancelled(_) => "cancelled",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::MockToolProvider;
    use crate::utils::toml_config::CacheConfig;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: 0.0,
        }
    }

    fn gateway_with(mock: MockToolProvider, retry: RetryPolicy) -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(mock));
        ToolGateway::new(registry, ToolCache::new(&CacheConfig::default()), retry)
    }

    fn search_mock() -> MockToolProvider {
        let mut mock = MockToolProvider::new();
        mock.expect_kind().return_const(ProviderKind::Search);
        mock.expect_backend().return_const("mock");
        mock
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: 0.1,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let mut mock = search_mock();
        mock.expect_call()
            .times(1)
            .returning(|_| Ok(json!({"results": []})));
        let gateway = gateway_with(mock, fast_retry(3));
        let cancel = CancellationToken::new();

        let first = gateway.call(&ToolRequest::search("Acme"), &cancel).await.unwrap();
        assert!(!first.record.cached);
        assert_eq!(first.record.attempts, 1);

        let second = gateway.call(&ToolRequest::search("  acme "), &cancel).await.unwrap();
        assert!(second.record.cached);
        assert_eq!(second.record.attempts, 0);
        assert_eq!(
            serde_json::to_string(&first.payload).unwrap(),
            serde_json::to_string(&second.payload).unwrap()
        );
        assert_eq!(gateway.provider_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut mock = search_mock();
        mock.expect_call().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Server {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(json!({"results": ["ok"]}))
            }
        });
        let gateway = gateway_with(mock, fast_retry(3));

        let response = gateway
            .call(&ToolRequest::search("acme"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.record.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_unavailable() {
        let mut mock = search_mock();
        mock.expect_call()
            .times(2)
            .returning(|_| Err(ProviderError::RateLimited("quota".into())));
        let gateway = gateway_with(mock, fast_retry(2));

        let err = gateway
            .call(&ToolRequest::search("acme"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolUnavailable(ProviderKind::Search)));
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let mut mock = search_mock();
        mock.expect_call()
            .times(1)
            .returning(|_| Err(ProviderError::NotFound("nothing".into())));
        let gateway = gateway_with(mock, fast_retry(3));

        let err = gateway
            .call(&ToolRequest::search("acme"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut mock = search_mock();
        mock.expect_call().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::NotFound("later".into()))
            } else {
                Ok(json!({"results": []}))
            }
        });
        let gateway = gateway_with(mock, fast_retry(1));
        let cancel = CancellationToken::new();

        assert!(gateway.call(&ToolRequest::search("acme"), &cancel).await.is_err());
        assert!(gateway.call(&ToolRequest::search("acme"), &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_without_provider_call() {
        let mut mock = search_mock();
        mock.expect_call().never();
        let gateway = gateway_with(mock, fast_retry(3));

        let err = gateway
            .call(&ToolRequest::search("   "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let mut mock = search_mock();
        mock.expect_call()
            .returning(|_| Err(ProviderError::Transport("reset".into())));
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        };
        let gateway = gateway_with(mock, retry);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = gateway
            .call(&ToolRequest::search("acme"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_invoke_records_failed_attempts() {
        let mut mock = search_mock();
        mock.expect_call()
            .times(2)
            .returning(|_| Err(ProviderError::Timeout));
        let gateway = gateway_with(mock, fast_retry(2));

        let request = ToolRequest::search("acme");
        let (outcome, record) = gateway.invoke(&request, &CancellationToken::new()).await;
        assert!(matches!(outcome, Err(AppError::ToolUnavailable(_))));
        assert_eq!(record.attempts, 2);
        assert!(!record.cached);
        assert_eq!(record.fingerprint, request.fingerprint());
        assert_eq!(
            record.outcome,
            ToolCallOutcome::Failed {
                kind: "unavailable".into()
            }
        );
    }
}
