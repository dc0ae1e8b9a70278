//! Anthropic-dialect route: `POST /v1/messages`.
//!
//! Streaming uses Anthropic's own event sequence
//! (`message_start` -> `content_block_start`/`content_block_delta`* ->
//! `content_block_stop` -> `message_delta` -> `message_stop`) rather than
//! the flat `data: {...}` framing `/v1/chat/completions` uses.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::canonical::{FinishReason, StreamChunk};
use crate::translate::anthropic as wire;

use super::auth::{authenticate, session_id};
use super::core::{apply_rate_limit_headers, run_chat, ChatOutcome};
use super::state::AppState;

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<wire::IncomingMessagesRequest>,
) -> Response {
    let client_key = match authenticate(&headers, state.config()) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };
    let sid = session_id(&headers);

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
            let events = anthropic_event_stream(stream);
            let mut resp = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
            resp.headers_mut().insert("x-session-id", sid.parse().unwrap());
            apply_rate_limit_headers(&mut resp, budget);
            resp
        }
    }
}

fn message_start_event(model: &str) -> Event {
    Event::default().event("message_start").data(
        serde_json::json!({
            "type": "message_start",
            "message": {
                "id": format!("msg_{}", uuid::Uuid::new_v4()),
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "usage": {"input_tokens": 0, "output_tokens": 0},
            },
        })
        .to_string(),
    )
}

/// Re-frames a canonical stream into Anthropic's block-oriented SSE
/// sequence. Text becomes block 0; each distinct tool-call id becomes
/// its own later block, opened the first time it's seen.
fn anthropic_event_stream(
    stream: crate::backend::BackendStream,
) -> impl futures::Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let mut stream = stream;
        let mut started = false;
        let mut text_block_open = false;
        let mut tool_blocks: HashMap<String, usize> = HashMap::new();
        let mut next_index: usize = 1;
        let mut final_reason = FinishReason::Stop;

        while let Some(item) = stream.next().await {
            let chunk: StreamChunk = match item {
                Ok(c) => c,
                Err(err) => {
                    yield Ok(Event::default().event("error").data(err.to_string()));
                    return;
                }
            };

            if !started {
                started = true;
                yield Ok(message_start_event(&chunk.model));
            }

            for choice in &chunk.choices {
                if let Some(text) = &choice.delta.content {
                    if !text_block_open {
                        text_block_open = true;
                        yield Ok(Event::default().event("content_block_start").data(
                            serde_json::json!({
                                "type": "content_block_start",
                                "index": 0,
                                "content_block": {"type": "text", "text": ""},
                            })
                            .to_string(),
                        ));
                    }
                    yield Ok(Event::default().event("content_block_delta").data(
                        serde_json::json!({
                            "type": "content_block_delta",
                            "index": 0,
                            "delta": {"type": "text_delta", "text": text},
                        })
                        .to_string(),
                    ));
                }

                if let Some(tool_deltas) = &choice.delta.tool_calls {
                    for delta in tool_deltas {
                        let index = *tool_blocks.entry(delta.id.clone()).or_insert_with(|| {
                            let idx = next_index;
                            next_index += 1;
                            idx
                        });
                        if delta.name.is_some() {
                            yield Ok(Event::default().event("content_block_start").data(
                                serde_json::json!({
                                    "type": "content_block_start",
                                    "index": index,
                                    "content_block": {"type": "tool_use", "id": delta.id, "name": delta.name},
                                })
                                .to_string(),
                            ));
                        }
                        if let Some(args) = &delta.arguments_delta {
                            yield Ok(Event::default().event("content_block_delta").data(
                                serde_json::json!({
                                    "type": "content_block_delta",
                                    "index": index,
                                    "delta": {"type": "input_json_delta", "partial_json": args},
                                })
                                .to_string(),
                            ));
                        }
                    }
                }

                if let Some(reason) = choice.finish_reason {
                    final_reason = reason;
                }
            }

            if chunk.choices.iter().any(|c| c.finish_reason.is_some()) {
                if text_block_open {
                    yield Ok(Event::default().event("content_block_stop").data(
                        serde_json::json!({"type": "content_block_stop", "index": 0}).to_string(),
                    ));
                }
                for index in tool_blocks.values() {
                    yield Ok(Event::default().event("content_block_stop").data(
                        serde_json::json!({"type": "content_block_stop", "index": index}).to_string(),
                    ));
                }
                yield Ok(Event::default().event("message_delta").data(
                    serde_json::json!({
                        "type": "message_delta",
                        "delta": {"stop_reason": finish_reason_to_stop_reason(final_reason)},
                    })
                    .to_string(),
                ));
                yield Ok(Event::default().event("message_stop").data(
                    serde_json::json!({"type": "message_stop"}).to_string(),
                ));
            }
        }
    }
}

fn finish_reason_to_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter | FinishReason::Error => "end_turn",
    }
}

