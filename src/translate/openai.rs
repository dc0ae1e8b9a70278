//! OpenAI chat-completions dialect: canonical <-> wire mapping.
//!
//! Wire struct shapes are carried over from the teacher's
//! `llm::openai::{ChatCompletionRequest, ChatMessage, OpenAITool,
//! ChatCompletionChunk, Delta, ToolCallDelta, Usage}`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canonical::{
    CanonicalChatRequest, Choice, ChoiceDelta, Content, Delta as CanonicalDelta, FinishReason,
    Message, Role, StreamChunk, Tool, ToolCall, ToolCallDelta as CanonicalToolCallDelta,
};
use crate::error::ProxyError;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAITool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAIFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIFunction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAIToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct WireChoice {
    pub delta: WireDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct WireToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Canonical -> OpenAI wire request.
pub fn request_to_wire(req: &CanonicalChatRequest) -> Result<ChatCompletionRequest, ProxyError> {
    let messages = req
        .messages
        .iter()
        .map(message_to_wire)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_completion_tokens: req.max_tokens,
        stop: if req.stop_sequences.is_empty() {
            None
        } else {
            Some(req.stop_sequences.clone())
        },
        stream: req.stream,
        stream_options: if req.stream {
            Some(StreamOptions { include_usage: true })
        } else {
            None
        },
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        }),
        // `reasoning_effort` passes through untouched for OpenAI, per
        // the translation service's parameter-mapping rules.
        reasoning_effort: req.reasoning_effort.map(|e| match e {
            crate::canonical::ReasoningEffort::Low => "low".to_string(),
            crate::canonical::ReasoningEffort::Medium => "medium".to_string(),
            crate::canonical::ReasoningEffort::High => "high".to_string(),
        }),
    })
}

fn message_to_wire(msg: &Message) -> Result<ChatMessage, ProxyError> {
    Ok(match msg.role {
        Role::System => ChatMessage::System { content: msg.text() },
        Role::User => ChatMessage::User { content: msg.text() },
        Role::Assistant => ChatMessage::Assistant {
            content: if msg.text().is_empty() { None } else { Some(msg.text()) },
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| OpenAIToolCall {
                        id: c.id.clone(),
                        tool_type: "function".to_string(),
                        function: OpenAIFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
        },
        Role::Tool => ChatMessage::Tool {
            content: msg.text(),
            tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
        },
    })
}

/// A single parsed SSE chunk -> canonical `StreamChunk`.
pub fn chunk_to_canonical(
    chunk: ChatCompletionChunk,
    stream_id: &str,
    model: &str,
    created_unix: i64,
) -> StreamChunk {
    let choices = chunk
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, c)| {
            let tool_calls = c.delta.tool_calls.map(|deltas| {
                deltas
                    .into_iter()
                    .map(|d| CanonicalToolCallDelta {
                        id: d.id.unwrap_or_else(|| format!("call_{}", d.index)),
                        name: d.function.as_ref().and_then(|f| f.name.clone()),
                        arguments_delta: d.function.and_then(|f| f.arguments),
                    })
                    .collect()
            });
            ChoiceDelta {
                index: index as u32,
                delta: CanonicalDelta {
                    role: None,
                    content: c.delta.content,
                    thinking: None,
                    tool_calls,
                },
                finish_reason: c.finish_reason.as_deref().map(finish_reason_from_wire),
            }
        })
        .collect();

    StreamChunk {
        id: chunk.id.unwrap_or_else(|| stream_id.to_string()),
        created_unix,
        model: chunk.model.unwrap_or_else(|| model.to_string()),
        choices,
        usage: chunk.usage.map(|u| crate::canonical::CanonicalUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: if u.total_tokens > 0 {
                u.total_tokens
            } else {
                u.prompt_tokens + u.completion_tokens
            },
        }),
    }
}

pub fn finish_reason_from_wire(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

pub fn finish_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::Error => "error",
    }
}

/// Build a `chat.completion.chunk` JSON payload for egress (canonical ->
/// OpenAI wire) without an intermediate struct, mirroring the field set
/// clients actually read.
pub fn canonical_chunk_to_wire_json(chunk: &StreamChunk) -> serde_json::Value {
    serde_json::json!({
        "id": chunk.id,
        "object": "chat.completion.chunk",
        "created": chunk.created_unix,
        "model": chunk.model,
        "choices": chunk.choices.iter().map(|c| {
            serde_json::json!({
                "index": c.index,
                "delta": {
                    "role": c.delta.role,
                    "content": c.delta.content,
                    "tool_calls": c.delta.tool_calls.as_ref().map(|deltas| deltas.iter().enumerate().map(|(i, d)| {
                        serde_json::json!({
                            "index": i,
                            "id": d.id,
                            "type": "function",
                            "function": {"name": d.name, "arguments": d.arguments_delta},
                        })
                    }).collect::<Vec<_>>()),
                },
                "finish_reason": c.finish_reason.map(finish_reason_to_wire),
            })
        }).collect::<Vec<_>>(),
    })
}

pub fn canonical_response_to_wire_json(resp: &crate::canonical::CanonicalChatResponse) -> serde_json::Value {
    serde_json::json!({
        "id": resp.id,
        "object": "chat.completion",
        "created": resp.created_unix,
        "model": resp.model,
        "choices": resp.choices.iter().map(|c: &Choice| {
            serde_json::json!({
                "index": c.index,
                "message": {
                    "role": "assistant",
                    "content": c.message.text(),
                    "tool_calls": c.message.tool_calls.as_ref().map(|calls: &Vec<ToolCall>| calls.iter().map(|tc| serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
                    })).collect::<Vec<_>>()),
                },
                "finish_reason": finish_reason_to_wire(c.finish_reason),
            })
        }).collect::<Vec<_>>(),
        "usage": {
            "prompt_tokens": resp.usage.prompt_tokens,
            "completion_tokens": resp.usage.completion_tokens,
            "total_tokens": resp.usage.total_tokens,
        },
    })
}

/// `stop` accepts either a bare string or an array of strings on the
/// wire; canonicalized to `stop_sequences` either way.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingStop {
    One(String),
    Many(Vec<String>),
}

impl IncomingStop {
    fn into_vec(self) -> Vec<String> {
        match self {
            IncomingStop::One(s) => vec![s],
            IncomingStop::Many(v) => v,
        }
    }
}

/// The client-facing `/v1/chat/completions` request body. Schema-driven
/// (explicit fields, not open `Value` copying) per the design notes on
/// avoiding reflection-shaped parameter forwarding.
#[derive(Debug, Deserialize)]
pub struct IncomingChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default, alias = "max_completion_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<IncomingStop>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<OpenAITool>>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Client request (OpenAI dialect) -> canonical, the frontend adapter's
/// ingress half of the translation service.
pub fn incoming_to_canonical(req: IncomingChatCompletionRequest) -> Result<CanonicalChatRequest, ProxyError> {
    let messages = req
        .messages
        .into_iter()
        .map(|m| match m {
            ChatMessage::System { content } => Message {
                role: Role::System,
                content: Content::Text(content),
                tool_call_id: None,
                tool_calls: None,
            },
            ChatMessage::User { content } => Message::user(content),
            ChatMessage::Assistant { content, tool_calls } => Message {
                role: Role::Assistant,
                content: Content::Text(content.unwrap_or_default()),
                tool_call_id: None,
                tool_calls: tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|c| ToolCall {
                            id: c.id,
                            name: c.function.name,
                            arguments: serde_json::from_str(&c.function.arguments)
                                .unwrap_or(serde_json::Value::Null),
                        })
                        .collect()
                }),
            },
            ChatMessage::Tool { content, tool_call_id } => Message {
                role: Role::Tool,
                content: Content::Text(content),
                tool_call_id: Some(tool_call_id),
                tool_calls: None,
            },
        })
        .collect();

    let reasoning_effort = req.reasoning_effort.as_deref().and_then(|e| match e {
        "low" => Some(crate::canonical::ReasoningEffort::Low),
        "medium" => Some(crate::canonical::ReasoningEffort::Medium),
        "high" => Some(crate::canonical::ReasoningEffort::High),
        _ => None,
    });

    Ok(CanonicalChatRequest {
        messages,
        model: req.model,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_tokens: req.max_tokens,
        stop_sequences: req.stop.map(IncomingStop::into_vec).unwrap_or_default(),
        reasoning_effort,
        thinking_budget: None,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| Tool {
                    name: t.function.name,
                    description: t.function.description,
                    parameters: t.function.parameters,
                })
                .collect()
        }),
        tool_choice: None,
        extra: req.extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_request() -> CanonicalChatRequest {
        CanonicalChatRequest {
            messages: vec![Message::user("hi")],
            model: "gpt-4".into(),
            stream: false,
            temperature: Some(0.5),
            top_p: None,
            top_k: None,
            max_tokens: Some(100),
            stop_sequences: vec![],
            reasoning_effort: None,
            thinking_budget: None,
            tools: None,
            tool_choice: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn request_round_trips_core_fields() {
        let req = base_request();
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(wire.model, "gpt-4");
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.temperature, Some(0.5));
    }

    #[test]
    fn finish_reason_maps_both_ways() {
        assert_eq!(finish_reason_from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(finish_reason_to_wire(FinishReason::ToolCalls), "tool_calls");
    }

    #[test]
    fn incoming_request_parses_messages_and_stop_array() {
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stop": ["END", "STOP"],
        });
        let incoming: IncomingChatCompletionRequest = serde_json::from_value(body).unwrap();
        let canonical = incoming_to_canonical(incoming).unwrap();
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.stop_sequences, vec!["END".to_string(), "STOP".to_string()]);
    }

    #[test]
    fn incoming_request_captures_unknown_fields_as_extra() {
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "n": 2,
        });
        let incoming: IncomingChatCompletionRequest = serde_json::from_value(body).unwrap();
        assert_eq!(incoming.extra.get("n").and_then(|v| v.as_i64()), Some(2));
    }
}
