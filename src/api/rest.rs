// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`:
//   GET /api/v1/health                       liveness + session count
//   GET /api/v1/indicators?interval=<iv>     one-shot snapshot (default "30m")
//   GET /api/v1/sessions                     active streaming sessions
//   GET /api/v1/ws                           streaming endpoint (see ws.rs)
//
// CORS is configured permissively; the service carries no authentication.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::app_state::AppState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/indicators", get(indicators))
        .route("/api/v1/sessions", get(sessions))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
    tracked_symbols: usize,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.sessions.active_count(),
        tracked_symbols: state.scanner.store().len(),
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// One-shot indicator snapshot
// =============================================================================

#[derive(Deserialize)]
struct IndicatorQuery {
    interval: Option<String>,
}

async fn indicators(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndicatorQuery>,
) -> impl IntoResponse {
    let interval = query
        .interval
        .filter(|iv| !iv.trim().is_empty())
        .unwrap_or_else(|| state.config.default_interval.clone());

    match state.scanner.scan(&interval).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            error!(interval = %interval, error = %e, "indicator query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

async fn sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.list())
}
