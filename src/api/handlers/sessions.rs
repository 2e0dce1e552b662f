//! Session lifecycle handlers
//!
//! Create, run, cancel and inspect sessions, and follow their event stream
//! over Server-Sent Events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};

use crate::AppState;
use crate::events::SessionEvent;
use crate::types::{
    CreateSessionRequest, CreateSessionResponse, EventsQuery, Result, SessionAck, SessionSnapshot,
};

/// SSE keep-alive comment interval
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Create a session
///
/// Validates the prompt and records the session; nothing runs until
/// `POST /api/sessions/{id}/run`.
#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid prompt")
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    let session = state.sessions.create(&payload.prompt, payload.strategy).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    responses(
        (status = 200, description = "Session, tasks and report when done", body = SessionSnapshot),
        (status = 404, description = "Unknown session")
    ),
    params(("id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>> {
    Ok(Json(state.sessions.snapshot(&id).await?))
}

/// Start a run
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/run",
    responses(
        (status = 202, description = "Run started", body = SessionAck),
        (status = 400, description = "Session already finished"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "A run is already in flight")
    ),
    params(("id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
pub async fn run_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SessionAck>)> {
    // detached; progress is observed through the event stream
    let _ = state.sessions.run(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SessionAck {
            ok: true,
            session_id: id,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/cancel",
    responses(
        (status = 202, description = "Cancellation requested", body = SessionAck),
        (status = 400, description = "Session is not running"),
        (status = 404, description = "Unknown session")
    ),
    params(("id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SessionAck>)> {
    state.sessions.cancel(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SessionAck {
            ok: true,
            session_id: id,
        }),
    ))
}

/// Follow a session's events
///
/// Replays events after `after` (or the `Last-Event-ID` header, which wins),
/// then streams live events until `final_report` or `error`.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/events",
    responses(
        (status = 200, description = "Server-Sent Events stream", content_type = "text/event-stream"),
        (status = 404, description = "Unknown session")
    ),
    params(
        ("id" = String, Path, description = "Session id"),
        ("after" = Option<u64>, Query, description = "Replay events with a greater sequence number")
    ),
    tag = "sessions"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let after = last_event_id(&headers).or(query.after).unwrap_or(0);
    let events = state.sessions.subscribe(&id, after).await?;

    let stream = events.map(|event| Ok(to_sse(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keepalive")))
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// One SSE frame: `id` = sequence number, `event` = type, `data` = payload
pub fn to_sse(event: &SessionEvent) -> Event {
    Event::default()
        .id(event.seq.to_string())
        .event(event.event_type())
        .data(event.payload.body().to_string())
}
