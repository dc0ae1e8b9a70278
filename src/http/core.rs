//! Shared request pipeline used by every dialect's routes: session and
//! command resolution, route/model resolution, dispatch, and the
//! response middleware chain. The three dialect modules only translate
//! wire <-> canonical and call into this.

use std::sync::Arc;

use axum::response::Response;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::backend::BackendStream;
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse, Choice, Content, FinishReason, Message, Role, ToolCallAssembler};
use crate::dispatch::attempt_log::{AllAttemptsFailed, AttemptOutcome};
use crate::error::ProxyError;
use crate::pipeline;
use crate::session::commands::render_command_only_response;
use crate::session::state::{LoopDetectionState, OneoffRoute, ToolLoopDetectionState};
use crate::session::Session;

use super::state::AppState;

pub enum ChatOutcome {
    /// The request carried only commands; no upstream call was made.
    CommandOnly(CanonicalChatResponse),
    NonStream(CanonicalChatResponse, RateLimitBudget),
    Stream(BackendStream, LoopDetectionState, ToolLoopDetectionState, RateLimitBudget),
}

/// `(limit, remaining)` for the scope of the attempt that ultimately
/// succeeded, rendered as `x-ratelimit-limit`/`x-ratelimit-remaining`
/// response headers. `None` when no attempt in the sequence ever
/// reached the rate limiter (e.g. command-only responses).
pub type RateLimitBudget = Option<(u64, u64)>;

/// Applies `x-ratelimit-*` headers to `resp` when `budget` is present.
pub fn apply_rate_limit_headers(resp: &mut Response, budget: RateLimitBudget) {
    if let Some((limit, remaining)) = budget {
        if let Ok(value) = limit.to_string().parse() {
            resp.headers_mut().insert("x-ratelimit-limit", value);
        }
        if let Ok(value) = remaining.to_string().parse() {
            resp.headers_mut().insert("x-ratelimit-remaining", value);
        }
    }
}

struct Resolution {
    request: CanonicalChatRequest,
    command_only: bool,
    command_response_text: String,
    loop_detection: LoopDetectionState,
    tool_loop_detection: ToolLoopDetectionState,
    model: String,
    oneoff: Option<OneoffRoute>,
}

/// Parses and applies any in-band commands from the trailing user
/// message, resolves the effective route (one-off > session override >
/// request body), and applies the session's reasoning overrides to the
/// forwarded request.
async fn resolve(state: &AppState, session_id: &str, mut request: CanonicalChatRequest) -> Resolution {
    let handle = state.sessions().get_or_create(session_id);
    let mut session = handle.lock().await;
    session.touch();

    let prefix = session.state.command_prefix.clone();
    let last_user_idx = request.messages.iter().rposition(|m| m.role == Role::User);

    let mut command_response_text = String::new();
    let mut command_only = false;

    if let Some(idx) = last_user_idx {
        let original = request.messages[idx].text();
        let (remaining, new_state, results) = state.commands().process(&original, &prefix, &session.state);
        session.state = new_state;

        if !results.is_empty() {
            request.messages[idx].content = Content::Text(remaining.clone());
            let has_forwardable = request.messages.iter().enumerate().any(|(i, m)| {
                matches!(m.role, Role::User | Role::Assistant | Role::Tool)
                    && !m.text().trim().is_empty()
                    && (i != idx || !remaining.trim().is_empty())
            });
            if !has_forwardable {
                command_only = true;
                command_response_text = render_command_only_response(&results);
            }
        }
    }

    let (oneoff, next_state) = session.state.take_oneoff_route();
    session.state = next_state;

    let reasoning = session.state.reasoning.clone();
    if let Some(effort) = reasoning.effort {
        request.reasoning_effort = Some(effort);
    }
    if let Some(budget) = reasoning.thinking_budget {
        request.thinking_budget = Some(budget);
    }
    if let Some(temperature) = reasoning.temperature {
        request.temperature = Some(temperature);
    }
    if let Some(top_p) = reasoning.top_p {
        request.top_p = Some(top_p);
    }
    if !command_only {
        if let (Some(idx), Some(prefix)) = (last_user_idx, reasoning.prompt_prefix.as_ref()) {
            let text = request.messages[idx].text();
            request.messages[idx].content = Content::Text(format!("{prefix}{text}"));
        }
        if let (Some(idx), Some(suffix)) = (last_user_idx, reasoning.prompt_suffix.as_ref()) {
            let text = request.messages[idx].text();
            request.messages[idx].content = Content::Text(format!("{text}{suffix}"));
        }
    }

    let model = match &oneoff {
        Some(_) => request.model.clone(),
        None => session.state.model_override.clone().unwrap_or_else(|| request.model.clone()),
    };

    Resolution {
        request,
        command_only,
        command_response_text,
        loop_detection: session.state.loop_detection.clone(),
        tool_loop_detection: session.state.tool_loop_detection.clone(),
        model,
        oneoff,
    }
}

pub async fn run_chat(
    state: &AppState,
    session_id: &str,
    request: CanonicalChatRequest,
    client_api_key: Option<&str>,
) -> Result<ChatOutcome, ProxyError> {
    let resolved = resolve(state, session_id, request).await;

    if resolved.command_only {
        return Ok(ChatOutcome::CommandOnly(synthesize_command_response(
            &resolved.model,
            &resolved.command_response_text,
        )));
    }

    resolved.request.validate_non_empty()?;

    let handle = state.sessions().get_or_create(session_id);

    let attempts = state
        .dispatcher()
        .build_attempts(&resolved.model, resolved.oneoff.as_ref(), state.config());
    if attempts.is_empty() {
        return Err(ProxyError::UnknownRoute(resolved.model.clone()));
    }

    let outcome = state
        .dispatcher()
        .dispatch(resolved.request, attempts, client_api_key, session_id)
        .await
        .map_err(|failed| map_all_attempts_failed(&failed))?;

    match outcome {
        crate::dispatch::DispatchOutcome::Response(response, log) => {
            let mut response = pipeline::apply_response_pipeline(&resolved.loop_detection, response);
            apply_tool_call_pipeline(state, &handle, &resolved.tool_loop_detection, &mut response).await;
            Ok(ChatOutcome::NonStream(response, log.rate_limit_budget))
        }
        crate::dispatch::DispatchOutcome::Stream(stream, log) => {
            let stream = pipeline::wrap_stream_with_content_loop_detection(resolved.loop_detection.clone(), stream);
            let stream = wrap_stream_with_tool_loop_detection(handle.clone(), resolved.tool_loop_detection.clone(), stream);
            Ok(ChatOutcome::Stream(stream, resolved.loop_detection, resolved.tool_loop_detection, log.rate_limit_budget))
        }
    }
}

fn synthesize_command_response(model: &str, text: &str) -> CanonicalChatResponse {
    CanonicalChatResponse {
        id: format!("cmd-{}", uuid::Uuid::new_v4()),
        created_unix: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
        }],
        usage: Default::default(),
    }
}

/// Runs each tool call in a non-streaming response through the tool-call
/// loop detector (recorded against the session's fingerprint history)
/// and, for calls whose name has a registered schema, through JSON
/// repair. A blocked call has its arguments replaced with an explanatory
/// error object rather than being silently dropped, so the client still
/// sees one tool_calls entry per call the model made.
async fn apply_tool_call_pipeline(
    state: &AppState,
    session: &tokio::sync::Mutex<crate::session::Session>,
    tool_loop_config: &ToolLoopDetectionState,
    response: &mut CanonicalChatResponse,
) {
    let detector = pipeline::ToolLoopDetector::new(tool_loop_config.clone());
    let now = Utc::now().timestamp();
    let mut session = session.lock().await;

    for choice in &mut response.choices {
        let Some(tool_calls) = choice.message.tool_calls.as_mut() else { continue };
        for call in tool_calls.iter_mut() {
            let action = detector.record_and_check(&mut session.tool_call_fingerprints, &call.name, &call.arguments, now);
            match action {
                pipeline::ToolLoopAction::Pass => {}
                pipeline::ToolLoopAction::Warn { message } => {
                    tracing::warn!(tool = call.name.as_str(), %message, "tool call loop warning");
                }
                pipeline::ToolLoopAction::InjectGuidance { message } => {
                    call.arguments = serde_json::json!({
                        "_loop_guidance": message,
                        "original_arguments": call.arguments,
                    });
                }
                pipeline::ToolLoopAction::Block { message } => {
                    call.arguments = serde_json::json!({ "_blocked": true, "reason": message });
                }
            }

            if let Some(schema_key) = state
                .config()
                .json_repair
                .schemas
                .keys()
                .find(|k| k.as_str() == call.name)
            {
                let rendered = serde_json::to_string(&call.arguments).unwrap_or_default();
                let outcome = state.json_repairer().process(&rendered, Some(schema_key.as_str()));
                if outcome.was_repaired {
                    if let Ok(value) = serde_json::from_str(&outcome.repaired_content) {
                        call.arguments = value;
                    }
                }
            }
        }
    }
}

/// Assembles streamed tool-call deltas as they arrive and, the moment a
/// chunk carries `finish_reason = ToolCalls`, runs every assembled call
/// through the loop detector against the session's shared fingerprint
/// history. A blocked call has its delta replaced with an error message
/// and the stream ends there with `finish_reason = Stop` instead of
/// `ToolCalls`; a guidance trip lets the original chunk through
/// followed by one extra content chunk carrying the guidance text.
fn wrap_stream_with_tool_loop_detection(
    session: Arc<Mutex<Session>>,
    config: ToolLoopDetectionState,
    stream: BackendStream,
) -> BackendStream {
    let out = async_stream::stream! {
        let mut stream = stream;
        let mut assembler = ToolCallAssembler::new();
        let detector = pipeline::ToolLoopDetector::new(config);

        while let Some(item) = stream.next().await {
            let mut chunk = match item {
                Err(err) => {
                    yield Err(err);
                    break;
                }
                Ok(chunk) => chunk,
            };

            let finishes_with_tool_calls = chunk
                .choices
                .iter()
                .any(|c| c.finish_reason == Some(FinishReason::ToolCalls));

            for choice in &chunk.choices {
                if let Some(deltas) = &choice.delta.tool_calls {
                    for d in deltas {
                        assembler.process_delta(d.id.clone(), d.name.clone(), d.arguments_delta.clone());
                    }
                }
            }

            if !finishes_with_tool_calls {
                yield Ok(chunk);
                continue;
            }

            let assembled = std::mem::take(&mut assembler).into_tool_calls().unwrap_or_default();
            let now = Utc::now().timestamp();
            let mut guidance_messages = Vec::new();
            let mut blocked = false;

            {
                let mut session = session.lock().await;
                for call in &assembled {
                    let action = detector.record_and_check(&mut session.tool_call_fingerprints, &call.name, &call.arguments, now);
                    match action {
                        pipeline::ToolLoopAction::Pass => {}
                        pipeline::ToolLoopAction::Warn { message } => {
                            tracing::warn!(tool = call.name.as_str(), %message, "tool call loop warning");
                        }
                        pipeline::ToolLoopAction::InjectGuidance { message } => guidance_messages.push(message),
                        pipeline::ToolLoopAction::Block { message } => {
                            blocked = true;
                            guidance_messages.push(message);
                        }
                    }
                }
            }

            if blocked {
                for choice in &mut chunk.choices {
                    choice.delta.tool_calls = None;
                    choice.delta.content = Some(guidance_messages.join("; "));
                    choice.finish_reason = Some(FinishReason::Stop);
                }
                yield Ok(chunk);
                break;
            }

            yield Ok(chunk.clone());

            if !guidance_messages.is_empty() {
                let mut guidance_chunk = chunk;
                for choice in &mut guidance_chunk.choices {
                    choice.delta.content = Some(guidance_messages.join("; "));
                    choice.delta.tool_calls = None;
                    choice.finish_reason = None;
                }
                yield Ok(guidance_chunk);
            }
        }
    };
    Box::pin(out)
}

fn map_all_attempts_failed(failed: &AllAttemptsFailed) -> ProxyError {
    for attempt in failed.log.attempts.iter().rev() {
        if let AttemptOutcome::Failed { message, .. } = &attempt.outcome {
            return ProxyError::UpstreamTransient {
                backend: attempt.backend.clone(),
                message: message.clone(),
                retry_after: None,
            };
        }
    }
    if failed
        .log
        .attempts
        .iter()
        .all(|a| matches!(a.outcome, AttemptOutcome::SkippedRateLimited))
    {
        return ProxyError::RateLimit { retry_after: None };
    }
    ProxyError::NoFunctionalBackend
}
