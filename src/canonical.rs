//! Canonical request/response model shared by every dialect and backend.
//!
//! Generalizes the teacher's `llm::provider` message/stream types into a
//! provider-agnostic shape: no `ProviderConfig` knobs live here, only the
//! wire-independent request/response data the translation layer maps
//! to and from each dialect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
    Audio { url: String },
    File { url: String, mime_type: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// `reasoning_effort -> thinkingConfig.thinkingBudget` table.
    pub fn gemini_thinking_budget(self) -> i64 {
        match self {
            ReasoningEffort::Low => 512,
            ReasoningEffort::Medium => 2048,
            ReasoningEffort::High => -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named { name: String },
}

/// The internal request: dialect-independent, frozen once command
/// stripping and state projection have produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub thinking_budget: Option<i64>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub extra: HashMap<String, Value>,
}

impl CanonicalChatRequest {
    /// Invariant: `messages` is non-empty after command stripping.
    pub fn validate_non_empty(&self) -> Result<(), crate::error::ProxyError> {
        if self.messages.is_empty() {
            return Err(crate::error::ProxyError::Validation(
                "empty_messages".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl CanonicalUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: FinishReason,
}

/// Non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChatResponse {
    pub id: String,
    pub created_unix: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: CanonicalUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceDelta {
    pub index: u32,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// Streaming response chunk. Chunks are totally ordered per stream; the
/// final chunk carries a terminal `finish_reason` and no further content
/// deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub created_unix: i64,
    pub model: String,
    pub choices: Vec<ChoiceDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
}

/// Helper for assembling parallel tool calls from streaming deltas, keyed
/// by tool-call id. Ported from the teacher's `ToolCallAssembler`.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: indexmap_like::OrderedMap,
}

mod indexmap_like {
    use super::*;

    /// Minimal insertion-order-preserving map; avoids pulling in the
    /// `indexmap` crate for a single use site while keeping deterministic
    /// tool-call ordering in assembled output (unlike a `HashMap`, whose
    /// iteration order is unspecified).
    #[derive(Debug, Default)]
    pub struct OrderedMap {
        order: Vec<String>,
        entries: HashMap<String, PartialToolCall>,
    }

    #[derive(Debug, Default)]
    pub struct PartialToolCall {
        pub id: String,
        pub name: Option<String>,
        pub arguments: String,
    }

    impl OrderedMap {
        pub fn entry(&mut self, id: String) -> &mut PartialToolCall {
            if !self.entries.contains_key(&id) {
                self.order.push(id.clone());
                self.entries.insert(
                    id.clone(),
                    PartialToolCall {
                        id: id.clone(),
                        name: None,
                        arguments: String::new(),
                    },
                );
            }
            self.entries.get_mut(&id).unwrap()
        }

        pub fn into_ordered(self) -> Vec<PartialToolCall> {
            let mut entries = self.entries;
            self.order
                .into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        }
    }
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_delta(
        &mut self,
        id: String,
        name: Option<String>,
        arguments_delta: Option<String>,
    ) {
        let call = self.calls.entry(id);
        if let Some(n) = name {
            call.name = Some(n);
        }
        if let Some(delta) = arguments_delta {
            call.arguments.push_str(&delta);
        }
    }

    pub fn into_tool_calls(self) -> Result<Vec<ToolCall>, serde_json::Error> {
        self.calls
            .into_ordered()
            .into_iter()
            .map(|partial| {
                let arguments = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments)?
                };
                Ok(ToolCall {
                    id: partial.id,
                    name: partial.name.unwrap_or_default(),
                    arguments,
                })
            })
            .collect()
    }
}
