//! HTTP edge: axum router, client authentication, and one route module
//! per client-facing wire dialect. The teacher has no HTTP layer at
//! all (it's a CLI), so this whole component is an ambient addition,
//! built in the ordinary axum/tower shape used across the pack.

pub mod anthropic;
pub mod auth;
pub mod core;
pub mod gemini;
pub mod health;
pub mod openai;
pub mod state;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config().proxy_timeout_seconds);

    Router::new()
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/models", get(openai::list_models))
        .route("/v1/messages", post(anthropic::messages))
        .route("/v1beta/models", get(gemini::list_models))
        .route("/v1beta/models/:model_action", post(gemini::model_action))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
