//! Gemini `generateContent`/`streamGenerateContent` dialect: canonical
//! <-> wire mapping.
//!
//! Wire struct shapes carried over from the teacher's
//! `llm::gemini::{GeminiContent, GeminiPart, GeminiThinkingConfig}`.
//! Unlike the teacher (which used a string `thinking_level` extra
//! option), `thinkingConfig.thinkingBudget` is driven by the
//! `reasoning_effort -> {low: 512, medium: 2048, high: -1}` table from
//! the translation service spec.

use serde::{Deserialize, Serialize};

use crate::canonical::{
    CanonicalChatRequest, Choice, ChoiceDelta, Delta as CanonicalDelta, FinishReason, Message,
    Role, StreamChunk, ToolCallDelta as CanonicalToolCallDelta,
};
use crate::error::ProxyError;

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeminiPart {
    #[serde(rename = "thought", skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiFunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GeminiGenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(rename = "topP", default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(rename = "topK", default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(rename = "maxOutputTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(rename = "thinkingConfig", default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    pub thinking_budget: i64,
}

fn message_role(role: &Role) -> &'static str {
    match role {
        Role::User | Role::System => "user",
        Role::Assistant => "model",
        Role::Tool => "function",
    }
}

/// System prompts lift to `systemInstruction` with role `user`, the Code
/// Assist (`v1internal:`) OAuth requirement.
pub fn request_to_wire(req: &CanonicalChatRequest) -> Result<GenerateContentRequest, ProxyError> {
    let mut system_instruction = None;
    let mut contents = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                system_instruction = Some(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![GeminiPart {
                        text: Some(msg.text()),
                        ..Default::default()
                    }],
                });
            }
            Role::User => contents.push(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(msg.text()),
                    ..Default::default()
                }],
            }),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.text().is_empty() {
                    parts.push(GeminiPart {
                        text: Some(msg.text()),
                        ..Default::default()
                    });
                }
                if let Some(calls) = &msg.tool_calls {
                    for c in calls {
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                name: c.name.clone(),
                                args: c.arguments.clone(),
                            }),
                            ..Default::default()
                        });
                    }
                }
                contents.push(GeminiContent {
                    role: Some(message_role(&Role::Assistant).to_string()),
                    parts,
                });
            }
            Role::Tool => contents.push(GeminiContent {
                role: Some("function".to_string()),
                parts: vec![GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: msg.tool_call_id.clone().unwrap_or_default(),
                        response: serde_json::json!({ "result": msg.text() }),
                    }),
                    ..Default::default()
                }],
            }),
        }
    }

    let thinking_config = req.reasoning_effort.map(|effort| GeminiThinkingConfig {
        thinking_budget: req
            .thinking_budget
            .unwrap_or_else(|| effort.gemini_thinking_budget()),
    });

    Ok(GenerateContentRequest {
        contents,
        tools: req.tools.as_ref().map(|tools| {
            vec![GeminiTool {
                function_declarations: tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            }]
        }),
        system_instruction,
        generation_config: Some(GeminiGenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: req.max_tokens,
            thinking_config,
        }),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    pub prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    pub candidates_token_count: Option<u32>,
}

pub fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("TOOL_CALLS") => FinishReason::ToolCalls,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

/// Gemini never assigns its own tool-call ids; the connector synthesizes
/// one per `functionCall` part using a monotonic counter (`next_call_id`
/// in `backend::gemini`), carried through here unchanged.
pub fn candidate_to_canonical(
    candidate: &GeminiCandidate,
    synthesize_call_id: impl Fn() -> String,
    stream_id: &str,
    model: &str,
    created_unix: i64,
) -> StreamChunk {
    let mut delta = CanonicalDelta::default();
    let mut tool_calls = Vec::new();

    if let Some(content) = &candidate.content {
        for part in &content.parts {
            if let Some(text) = &part.text {
                delta.content = Some(delta.content.unwrap_or_default() + text);
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(CanonicalToolCallDelta {
                    id: synthesize_call_id(),
                    name: Some(call.name.clone()),
                    arguments_delta: Some(call.args.to_string()),
                });
            }
        }
    }
    if !tool_calls.is_empty() {
        delta.tool_calls = Some(tool_calls);
    }

    StreamChunk {
        id: stream_id.to_string(),
        created_unix,
        model: model.to_string(),
        choices: vec![ChoiceDelta {
            index: 0,
            delta,
            finish_reason: candidate
                .finish_reason
                .as_deref()
                .map(|r| parse_finish_reason(Some(r))),
        }],
        usage: None,
    }
}

pub fn canonical_response_to_wire_json(resp: &crate::canonical::CanonicalChatResponse) -> serde_json::Value {
    let choice: &Choice = resp.choices.first().expect("non-streaming response has one choice");
    serde_json::json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{"text": choice.message.text()}],
            },
            "finishReason": match choice.finish_reason {
                FinishReason::Stop => "STOP",
                FinishReason::Length => "MAX_TOKENS",
                FinishReason::ToolCalls => "TOOL_CALLS",
                FinishReason::ContentFilter => "SAFETY",
                FinishReason::Error => "OTHER",
            },
        }],
        "usageMetadata": {
            "promptTokenCount": resp.usage.prompt_tokens,
            "candidatesTokenCount": resp.usage.completion_tokens,
        },
    })
}

/// The client-facing `generateContent`/`streamGenerateContent` request
/// body. `model` and `stream` are not carried on the wire body itself
/// (they come from the URL path and method); the HTTP edge supplies
/// them separately.
#[derive(Debug, Deserialize)]
pub struct IncomingGenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", default)]
    pub system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", default)]
    pub generation_config: Option<GeminiGenerationConfig>,
    #[serde(default)]
    pub tools: Option<Vec<GeminiTool>>,
}

/// Client request (Gemini dialect) -> canonical.
pub fn incoming_to_canonical(
    req: IncomingGenerateContentRequest,
    model: &str,
    stream: bool,
) -> Result<CanonicalChatRequest, ProxyError> {
    let mut messages = Vec::with_capacity(req.contents.len() + 1);

    if let Some(system) = req.system_instruction {
        let text: String = system.parts.iter().filter_map(|p| p.text.clone()).collect();
        messages.push(Message {
            role: Role::System,
            content: crate::canonical::Content::Text(text),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    for content in req.contents {
        let role = match content.role.as_deref() {
            Some("model") => Role::Assistant,
            Some("function") => Role::Tool,
            _ => Role::User,
        };
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_call_id = None;
        for part in content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(crate::canonical::ToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    name: call.name,
                    arguments: call.args,
                });
            }
            if let Some(response) = part.function_response {
                tool_call_id = Some(response.name);
                text.push_str(&response.response.to_string());
            }
        }
        messages.push(Message {
            role,
            content: crate::canonical::Content::Text(text),
            tool_call_id,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        });
    }

    let generation_config = req.generation_config.unwrap_or_default();
    let thinking_budget = generation_config.thinking_config.map(|c| c.thinking_budget);

    Ok(CanonicalChatRequest {
        messages,
        model: model.to_string(),
        stream,
        temperature: generation_config.temperature,
        top_p: generation_config.top_p,
        top_k: generation_config.top_k,
        max_tokens: generation_config.max_output_tokens,
        stop_sequences: vec![],
        reasoning_effort: None,
        thinking_budget,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .flat_map(|t| t.function_declarations)
                .map(|d| crate::canonical::Tool {
                    name: d.name,
                    description: d.description.unwrap_or_default(),
                    parameters: d.parameters,
                })
                .collect()
        }),
        tool_choice: None,
        extra: std::collections::HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reasoning_effort_maps_to_thinking_budget_table() {
        let mut req = CanonicalChatRequest {
            messages: vec![Message::user("hi")],
            model: "gemini-3-pro-preview".into(),
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop_sequences: vec![],
            reasoning_effort: Some(crate::canonical::ReasoningEffort::Low),
            thinking_budget: None,
            tools: None,
            tool_choice: None,
            extra: HashMap::new(),
        };
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(
            wire.generation_config.unwrap().thinking_config.unwrap().thinking_budget,
            512
        );

        req.reasoning_effort = Some(crate::canonical::ReasoningEffort::High);
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(
            wire.generation_config.unwrap().thinking_config.unwrap().thinking_budget,
            -1
        );
    }

    #[test]
    fn system_instruction_uses_user_role() {
        let req = CanonicalChatRequest {
            messages: vec![
                Message {
                    role: Role::System,
                    content: crate::canonical::Content::Text("be terse".into()),
                    tool_call_id: None,
                    tool_calls: None,
                },
                Message::user("hi"),
            ],
            model: "gemini-3-flash-preview".into(),
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
        };
        let wire = request_to_wire(&req).unwrap();
        assert_eq!(wire.system_instruction.unwrap().role.as_deref(), Some("user"));
    }

    #[test]
    fn incoming_request_maps_contents_and_model_from_path() {
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"temperature": 0.2},
        });
        let incoming: IncomingGenerateContentRequest = serde_json::from_value(body).unwrap();
        let canonical = incoming_to_canonical(incoming, "gemini-3-pro-preview", false).unwrap();
        assert_eq!(canonical.model, "gemini-3-pro-preview");
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.temperature, Some(0.2));
    }
}
