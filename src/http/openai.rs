//! OpenAI-dialect routes: `POST /v1/chat/completions`, `GET /v1/models`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::dispatch::CredentialSource;
use crate::translate::openai as wire;

use super::auth::{authenticate, session_id};
use super::core::{apply_rate_limit_headers, run_chat, ChatOutcome};
use super::state::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<wire::IncomingChatCompletionRequest>,
) -> Response {
    let client_key = match authenticate(&headers, state.config()) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };
    let sid = session_id(&headers);
    let is_stream = body.stream;

    let request = match wire::incoming_to_canonical(body) {
        Ok(r) => r,
        Err(err) => return err.into_response(),
    };

    let outcome = match run_chat(&state, &sid, request, client_key.as_deref()).await {
        Ok(outcome) => outcome,
        Err(err) => return err.into_response(),
    };

    match outcome {
        ChatOutcome::CommandOnly(response) => {
            let body = wire::canonical_response_to_wire_json(&response);
            let mut resp = Json(body).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            resp
        }
        ChatOutcome::NonStream(response, budget) => {
            let body = wire::canonical_response_to_wire_json(&response);
            let mut resp = Json(body).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            apply_rate_limit_headers(&mut resp, budget);
            resp
        }
        ChatOutcome::Stream(stream, _, _, budget) => {
            if !is_stream {
                tracing::warn!("backend returned a stream for a non-streaming request");
            }
            let events = stream.map(|item| match item {
                Ok(chunk) => {
                    Ok::<_, std::convert::Infallible>(Event::default().data(wire::canonical_chunk_to_wire_json(&chunk).to_string()))
                }
                Err(err) => Ok(Event::default().event("error").data(err.to_string())),
            });
            let done = futures::stream::once(async { Ok::<_, std::convert::Infallible>(Event::default().data("[DONE]")) });
            let mut resp = Sse::new(events.chain(done))
                .keep_alive(KeepAlive::default())
                .into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            apply_rate_limit_headers(&mut resp, budget);
            resp
        }
    }
}

/// Aggregated `backend:model` ids across every backend with at least one
/// functional credential.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authenticate(&headers, state.config()) {
        return err.into_response();
    }

    let mut ids = Vec::new();
    for backend_name in state.dispatcher().registry().names() {
        let Some(connector) = state.dispatcher().registry().get(&backend_name) else { continue };
        let Some(key_name) = crate::credentials::first_key_name(&state.config().backends, &backend_name) else { continue };
        let Some(credential) = state.credentials().resolve(&backend_name, &key_name).await else { continue };
        match connector.list_models(&credential).await {
            Ok(models) => ids.extend(models.into_iter().map(|m| format!("{backend_name}:{m}"))),
            Err(err) => tracing::warn!(backend = backend_name.as_str(), error = %err, "failed to list models"),
        }
    }

    Json(serde_json::json!({
        "object": "list",
        "data": ids.into_iter().map(|id| serde_json::json!({"id": id, "object": "model"})).collect::<Vec<_>>(),
    }))
    .into_response()
}
