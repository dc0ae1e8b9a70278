//! Gemini-dialect routes: `GET /v1beta/models`,
//! `POST /v1beta/models/{model}:generateContent`,
//! `POST /v1beta/models/{model}:streamGenerateContent`.
//!
//! Neither `model` nor `stream` travel in the Gemini wire body; the
//! model comes from the URL path segment and `stream` from which of the
//! two endpoints was hit, so both are threaded in from the route rather
//! than read off the parsed request.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::dispatch::CredentialSource;
use crate::translate::gemini as wire;

use super::auth::{authenticate, session_id};
use super::core::{apply_rate_limit_headers, run_chat, ChatOutcome};
use super::state::AppState;

async fn generate(state: AppState, headers: HeaderMap, model: String, stream: bool, body: wire::IncomingGenerateContentRequest) -> Response {
    let client_key = match authenticate(&headers, state.config()) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };
    let sid = session_id(&headers);

    let mut request = match wire::incoming_to_canonical(body, &model, stream) {
        Ok(r) => r,
        Err(err) => return err.into_response(),
    };
    request.model = model;

    let outcome = match run_chat(&state, &sid, request, client_key.as_deref()).await {
        Ok(outcome) => outcome,
        Err(err) => return err.into_response(),
    };

    match outcome {
        ChatOutcome::CommandOnly(response) => {
            let mut resp = Json(wire::canonical_response_to_wire_json(&response)).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            resp
        }
        ChatOutcome::NonStream(response, budget) => {
            let mut resp = Json(wire::canonical_response_to_wire_json(&response)).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            apply_rate_limit_headers(&mut resp, budget);
            resp
        }
        ChatOutcome::Stream(stream, _, _, budget) => {
            let events = stream.map(|item| match item {
                Ok(chunk) => Ok::<_, std::convert::Infallible>(Event::default().data(chunk_to_gemini_json(&chunk).to_string())),
                Err(err) => Ok(Event::default().event("error").data(err.to_string())),
            });
            let mut resp = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            apply_rate_limit_headers(&mut resp, budget);
            resp
        }
    }
}

fn chunk_to_gemini_json(chunk: &crate::canonical::StreamChunk) -> serde_json::Value {
    let choice = chunk.choices.first();
    let text = choice.and_then(|c| c.delta.content.clone()).unwrap_or_default();
    let finish = choice.and_then(|c| c.finish_reason).map(|reason| match reason {
        crate::canonical::FinishReason::Stop => "STOP",
        crate::canonical::FinishReason::Length => "MAX_TOKENS",
        crate::canonical::FinishReason::ToolCalls => "TOOL_CALLS",
        crate::canonical::FinishReason::ContentFilter => "SAFETY",
        crate::canonical::FinishReason::Error => "OTHER",
    });

    serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": finish,
        }],
        "usageMetadata": chunk.usage.as_ref().map(|u| serde_json::json!({
            "promptTokenCount": u.prompt_tokens,
            "candidatesTokenCount": u.completion_tokens,
        })),
    })
}

/// `POST /v1beta/models/{model}:generateContent` and
/// `POST /v1beta/models/{model}:streamGenerateContent` share a route
/// pattern — axum matches the whole `{model}:action` segment as one
/// path param since `:` isn't a path separator — so the action suffix
/// is split off here and used to pick streaming vs non-streaming.
pub async fn model_action(
    State(state): State<AppState>,
    Path(model_and_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<wire::IncomingGenerateContentRequest>,
) -> Response {
    if let Some(model) = model_and_action.strip_suffix(":generateContent") {
        return generate(state, headers, model.to_string(), false, body).await;
    }
    if let Some(model) = model_and_action.strip_suffix(":streamGenerateContent") {
        return generate(state, headers, model.to_string(), true, body).await;
    }
    crate::error::ProxyError::UnknownRoute(model_and_action).into_response()
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authenticate(&headers, state.config()) {
        return err.into_response();
    }

    let mut models = Vec::new();
    for (backend_name, backend_cfg) in &state.config().backends {
        if backend_cfg.kind != "gemini" {
            continue;
        }
        let Some(connector) = state.dispatcher().registry().get(backend_name) else { continue };
        let Some(key_name) = crate::credentials::first_key_name(&state.config().backends, backend_name) else { continue };
        let Some(credential) = state.credentials().resolve(backend_name, &key_name).await else { continue };
        match connector.list_models(&credential).await {
            Ok(found) => models.extend(found),
            Err(err) => tracing::warn!(backend = backend_name.as_str(), error = %err, "failed to list models"),
        }
    }

    Json(serde_json::json!({
        "models": models.into_iter().map(|m| serde_json::json!({"name": format!("models/{m}")})).collect::<Vec<_>>(),
    }))
    .into_response()
}
