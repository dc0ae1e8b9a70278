//! Liveness/readiness routes. No auth: these are probed by
//! infrastructure, not by LLM clients.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let errors = state.credentials().get_errors().await;
    Json(serde_json::json!({"status": "ok", "credential_errors": errors})).into_response()
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let functional = state.credentials().functional_backend_count().await;
    if functional > 0 {
        Json(serde_json::json!({"status": "ready", "functional_backends": functional})).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"status": "not_ready"}))).into_response()
    }
}
