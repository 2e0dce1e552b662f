use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;

use crate::AppState;
use crate::api::ApiDoc;
use crate::api::handlers::{health, sessions};

/// Largest accepted request body; prompts are short
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Routes mounted under `/api`
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/diagnostics", get(health::diagnostics))
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/run", post(sessions::run_session))
        .route("/sessions/{id}/cancel", post(sessions::cancel_session))
        .route("/sessions/{id}/events", get(sessions::stream_events))
}

/// The full application: API routes and OpenAPI document behind tracing, CORS and a body limit.
pub fn build_app(state: AppState) -> Router {
    let origins = state.config_manager.config().server.cors_origins.clone();

    let app = Router::new().nest("/api", create_router());

    #[cfg(feature = "swagger-ui")]
    let app = app.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );
    #[cfg(not(feature = "swagger-ui"))]
    let app = app.route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    );

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&origins))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
    )
    .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
