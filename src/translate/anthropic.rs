//! Anthropic messages dialect: canonical <-> wire mapping.
//!
//! Wire struct shapes carried over from the teacher's
//! `llm::anthropic::{CreateMessageRequest, AnthropicMessage,
//! AnthropicContentBlock, ContentBlockDelta, ContentDelta}`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canonical::{
    CanonicalChatRequest, Choice, ChoiceDelta, Content, Delta as CanonicalDelta, FinishReason,
    Message, Role, StreamChunk, Tool, ToolCall, ToolCallDelta as CanonicalToolCallDelta,
};
use crate::error::ProxyError;

#[derive(Debug, Serialize)]
pub struct CreateMessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Split out the system prompt (canonical `system` role -> Anthropic's
/// top-level `system` field) and map the remaining turns, folding tool
/// results into `user` messages containing `tool_result` blocks.
pub fn request_to_wire(req: &CanonicalChatRequest) -> Result<CreateMessageRequest, ProxyError> {
    let mut system = None;
    let mut messages = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                system = Some(match system {
                    Some(existing) => format!("{existing}\n{}", msg.text()),
                    None => msg.text(),
                });
            }
            Role::User => messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Text(msg.text()),
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !msg.text().is_empty() {
                    blocks.push(AnthropicContentBlock::Text { text: msg.text() });
                }
                if let Some(calls) = &msg.tool_calls {
                    for c in calls {
                        blocks.push(AnthropicContentBlock::ToolUse {
                            id: c.id.clone(),
                            name: c.name.clone(),
                            input: c.arguments.clone(),
                        });
                    }
                }
                messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: AnthropicContent::Blocks(blocks),
                });
            }
            Role::Tool => messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.text(),
                    is_error: None,
                }]),
            }),
        }
    }

    Ok(CreateMessageRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(4096),
        messages,
        system,
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: if req.stop_sequences.is_empty() {
            None
        } else {
            Some(req.stop_sequences.clone())
        },
        stream: Some(req.stream),
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    input_schema: t.parameters.clone(),
                })
                .collect()
        }),
    })
}

#[derive(Debug, Deserialize)]
pub struct ContentBlockStart {
    pub index: usize,
    pub content_block: AnthropicContentBlock,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlockDelta {
    pub index: usize,
    pub delta: ContentDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
pub struct MessageDeltaContent {
    pub stop_reason: Option<String>,
}

pub fn stop_reason_to_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

/// Build a canonical stream-chunk delta from one `content_block_delta`
/// event. Tool-use `input_json_delta` events carry only an `index`; the
/// caller is responsible for mapping index -> synthesized tool-call id
/// (the block's `ToolUse.id` from the matching `content_block_start`).
pub fn content_block_delta_to_canonical(
    event: ContentBlockDelta,
    tool_call_id: Option<&str>,
    stream_id: &str,
    model: &str,
    created_unix: i64,
) -> StreamChunk {
    let delta = match event.delta {
        ContentDelta::TextDelta { text } => CanonicalDelta {
            content: Some(text),
            ..Default::default()
        },
        ContentDelta::ThinkingDelta { thinking } => CanonicalDelta {
            thinking: Some(thinking),
            ..Default::default()
        },
        ContentDelta::InputJsonDelta { partial_json } => CanonicalDelta {
            tool_calls: Some(vec![CanonicalToolCallDelta {
                id: tool_call_id.unwrap_or_default().to_string(),
                name: None,
                arguments_delta: Some(partial_json),
            }]),
            ..Default::default()
        },
    };

    StreamChunk {
        id: stream_id.to_string(),
        created_unix,
        model: model.to_string(),
        choices: vec![ChoiceDelta {
            index: 0,
            delta,
            finish_reason: None,
        }],
        usage: None,
    }
}

pub fn canonical_response_to_wire_json(resp: &crate::canonical::CanonicalChatResponse) -> serde_json::Value {
    let choice: &Choice = resp.choices.first().expect("non-streaming response has one choice");
    let mut blocks = Vec::new();
    if !choice.message.text().is_empty() {
        blocks.push(serde_json::json!({"type": "text", "text": choice.message.text()}));
    }
    if let Some(calls) = &choice.message.tool_calls {
        for c in calls {
            blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": c.id,
                "name": c.name,
                "input": c.arguments,
            }));
        }
    }
    let content = serde_json::Value::Array(blocks);

    serde_json::json!({
        "id": resp.id,
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": content,
        "stop_reason": match choice.finish_reason {
            FinishReason::Stop => "end_turn",
            FinishReason::Length => "max_tokens",
            FinishReason::ToolCalls => "tool_use",
            FinishReason::ContentFilter | FinishReason::Error => "end_turn",
        },
        "usage": {
            "input_tokens": resp.usage.prompt_tokens,
            "output_tokens": resp.usage.completion_tokens,
        },
    })
}

/// The client-facing `/v1/messages` request body.
#[derive(Debug, Deserialize)]
pub struct IncomingMessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub tools: Option<Vec<AnthropicTool>>,
}

fn default_max_tokens() -> u32 {
    4096
}

/// Client request (Anthropic dialect) -> canonical. The system field, if
/// present, becomes a leading `system`-role message; tool-result blocks
/// inside `user` messages become `tool`-role messages.
pub fn incoming_to_canonical(req: IncomingMessagesRequest) -> Result<CanonicalChatRequest, ProxyError> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = req.system {
        messages.push(Message {
            role: Role::System,
            content: Content::Text(system),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    for msg in req.messages {
        let role = match msg.role.as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        match msg.content {
            AnthropicContent::Text(text) => messages.push(Message {
                role,
                content: Content::Text(text),
                tool_call_id: None,
                tool_calls: None,
            }),
            AnthropicContent::Blocks(blocks) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                        AnthropicContentBlock::Thinking { thinking } => text.push_str(&thinking),
                        AnthropicContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(ToolCall { id, name, arguments: input });
                        }
                        AnthropicContentBlock::ToolResult { tool_use_id, content, .. } => {
                            messages.push(Message {
                                role: Role::Tool,
                                content: Content::Text(content),
                                tool_call_id: Some(tool_use_id),
                                tool_calls: None,
                            });
                        }
                    }
                }
                if !text.is_empty() || !tool_calls.is_empty() {
                    messages.push(Message {
                        role,
                        content: Content::Text(text),
                        tool_call_id: None,
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    });
                }
            }
        }
    }

    Ok(CanonicalChatRequest {
        messages,
        model: req.model,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        max_tokens: Some(req.max_tokens),
        stop_sequences: req.stop_sequences.unwrap_or_default(),
        reasoning_effort: None,
        thinking_budget: None,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| Tool {
                    name: t.name,
                    description: t.description.unwrap_or_default(),
                    parameters: t.input_schema,
                })
                .collect()
        }),
        tool_choice: None,
        extra: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_with(messages: Vec<Message>) -> CanonicalChatRequest {
        CanonicalChatRequest {
            messages,
            model: "claude-sonnet".into(),
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop_sequences: vec![],
            reasoning_effort: None,
            thinking_budget: None,
            tools: None,
            tool_choice: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn system_message_lifts_to_top_level_field() {
        let req = req_with(vec![
            Message {
                role: Role::System,
                content: crate::canonical::Content::Text("be nice".into()),
                tool_call_id: None,
                tool_calls: None,
            },
            Message::user("hi"),
        ]);
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(wire.system.as_deref(), Some("be nice"));
        assert_eq!(wire.messages.len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_message_with_tool_result_block() {
        let req = req_with(vec![Message {
            role: Role::Tool,
            content: crate::canonical::Content::Text("42".into()),
            tool_call_id: Some("call_1".into()),
            tool_calls: None,
        }]);
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(wire.messages[0].role, "user");
        match &wire.messages[0].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
            }
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn stop_reason_maps_tool_use() {
        assert_eq!(stop_reason_to_finish_reason("tool_use"), FinishReason::ToolCalls);
    }

    #[test]
    fn incoming_request_lifts_system_field_to_message() {
        let body = serde_json::json!({
            "model": "claude-sonnet",
            "system": "be terse",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "hi"}],
        });
        let incoming: IncomingMessagesRequest = serde_json::from_value(body).unwrap();
        let canonical = incoming_to_canonical(incoming).unwrap();
        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, Role::System);
        assert_eq!(canonical.max_tokens, Some(256));
    }
}
