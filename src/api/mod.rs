//! HTTP API Handlers and Routes
//!
//! This module provides the REST + SSE layer, built on the Axum web framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//!
//! # API Endpoints
//!
//! ## Sessions (`/api/sessions`)
//! - `POST /api/sessions` - Create a session from `{prompt, strategy?}`
//! - `GET /api/sessions/{id}` - Session, tasks and report
//! - `POST /api/sessions/{id}/run` - Start the run
//! - `POST /api/sessions/{id}/cancel` - Cancel the in-flight run
//! - `GET /api/sessions/{id}/events?after=N` - Event stream (SSE)
//!
//! ## Health (`/api/health`)
//! - `GET /api/health` - Health check endpoint
//! - `GET /api/diagnostics` - Tool cache and session counters
//!
//! # Event stream
//!
//! Each SSE frame carries `id` (sequence number), `event` (type) and `data`
//! (JSON payload). Reconnecting clients send `Last-Event-ID` and receive
//! exactly the events they missed.
//!
//! # OpenAPI Documentation
//!
//! The document is served at `/api-docs/openapi.json`. When the `swagger-ui`
//! feature is enabled, interactive API documentation is available at
//! `/swagger-ui/`.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

use utoipa::OpenApi;

use crate::api::handlers::{health, sessions};
use crate::tools::cache::CacheStats;
use crate::types::{
    AgentKind, CreateSessionRequest, CreateSessionResponse, HealthResponse, Report, Session,
    SessionAck, SessionSnapshot, SessionStatus, Source, Strategy, Task, TaskStatus,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "MarketScout API", description = "Multi-agent market research sessions"),
    paths(
        health::health,
        health::diagnostics,
        sessions::create_session,
        sessions::get_session,
        sessions::run_session,
        sessions::cancel_session,
        sessions::stream_events,
    ),
    components(schemas(
        AgentKind,
        CacheStats,
        CreateSessionRequest,
        CreateSessionResponse,
        health::DiagnosticsResponse,
        HealthResponse,
        Report,
        Session,
        SessionAck,
        SessionSnapshot,
        SessionStatus,
        Source,
        Strategy,
        Task,
        TaskStatus,
    )),
    tags(
        (name = "sessions", description = "Session lifecycle and event streaming"),
        (name = "health", description = "Liveness and diagnostics")
    )
)]
pub struct ApiDoc;
