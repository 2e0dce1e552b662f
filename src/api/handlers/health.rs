use std::collections::BTreeMap;

use axum::{Json, extract::State};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::tools::cache::CacheStats;
use crate::types::HealthResponse;

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        time: Utc::now(),
    })
}

/// Tool gateway and session registry counters
#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Backend label per provider, e.g. `search = "tavily"`
    pub backends: BTreeMap<String, String>,
    pub cache: CacheStats,
    /// Calls that reached a provider (cache hits excluded)
    pub provider_calls: u64,
    pub live_sessions: usize,
}

#[utoipa::path(
    get,
    path = "/api/diagnostics",
    responses(
        (status = 200, description = "Gateway and session counters", body = DiagnosticsResponse)
    ),
    tag = "health"
)]
pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsResponse> {
    let gateway = state.sessions.gateway();
    Json(DiagnosticsResponse {
        backends: gateway
            .registry()
            .backends()
            .into_iter()
            .map(|(kind, backend)| (kind.to_string(), backend.to_string()))
            .collect(),
        cache: gateway.cache_stats(),
        provider_calls: gateway.provider_calls(),
        live_sessions: state.sessions.live_sessions(),
    })
}
