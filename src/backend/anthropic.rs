//! Anthropic connector. HTTP/SSE plumbing grounded in the teacher's
//! `llm::anthropic::AnthropicProvider` (`x-api-key`/`anthropic-version`
//! headers, `/messages` path), retargeted to the canonical model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::sse::{sse_events, SseEvent};
use crate::backend::{map_http_error, map_transport_error, ActiveCredential, BackendConnector, BackendStream, ModelListCache};
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse};
use crate::error::ProxyError;
use crate::translate::anthropic as wire;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicConnector {
    client: reqwest::Client,
    base_url: String,
    models: ModelListCache,
}

impl AnthropicConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: ANTHROPIC_API_BASE.to_string(),
            models: ModelListCache::default(),
        }
    }

    async fn send(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
        stream: bool,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut wire_request = wire::request_to_wire(request)?;
        wire_request.stream = Some(stream);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("Content-Type", "application/json")
            .header("x-api-key", &credential.secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| map_transport_error("anthropic", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("anthropic", status, &body, retry_after));
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendConnector for AnthropicConnector {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn chat_completion(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<CanonicalChatResponse, ProxyError> {
        let response = self.send(request, credential, false).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| map_transport_error("anthropic", &e))?;

        let blocks = body["content"].as_array().cloned().unwrap_or_default();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in &blocks {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(crate::canonical::ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                }),
                _ => {}
            }
        }

        Ok(CanonicalChatResponse {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            created_unix: Utc::now().timestamp(),
            model: body["model"].as_str().unwrap_or(&request.model).to_string(),
            choices: vec![crate::canonical::Choice {
                index: 0,
                finish_reason: wire::stop_reason_to_finish_reason(
                    body["stop_reason"].as_str().unwrap_or("end_turn"),
                ),
                message: crate::canonical::Message {
                    role: crate::canonical::Role::Assistant,
                    content: crate::canonical::Content::Text(text),
                    tool_call_id: None,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                },
            }],
            usage: crate::canonical::CanonicalUsage {
                prompt_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: (body["usage"]["input_tokens"].as_u64().unwrap_or(0)
                    + body["usage"]["output_tokens"].as_u64().unwrap_or(0)) as u32,
            },
        })
    }

    async fn chat_completion_stream(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<BackendStream, ProxyError> {
        let response = self.send(request, credential, true).await?;
        let byte_stream = Box::pin(response.bytes_stream());
        let events = sse_events(byte_stream, Duration::from_secs(30), "anthropic");
        let model = request.model.clone();
        let stream_id = format!("msg_{}", uuid::Uuid::new_v4());
        let created_unix = Utc::now().timestamp();

        Ok(Box::pin(async_stream::stream! {
            let mut events = events;
            use futures::StreamExt;
            // index -> synthesized tool-call id, populated from
            // `content_block_start` events carrying `tool_use` blocks.
            let mut tool_call_ids: std::collections::HashMap<usize, String> = std::collections::HashMap::new();

            while let Some(event) = events.next().await {
                let data = match event? {
                    SseEvent::Done => break,
                    SseEvent::Data(d) => d,
                };
                let envelope: serde_json::Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        yield Err(ProxyError::UpstreamProtocol {
                            backend: "anthropic".into(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                match envelope["type"].as_str() {
                    Some("content_block_start") => {
                        if let Ok(start) = serde_json::from_value::<wire::ContentBlockStart>(envelope.clone()) {
                            if let wire::AnthropicContentBlock::ToolUse { id, .. } = &start.content_block {
                                tool_call_ids.insert(start.index, id.clone());
                            }
                        }
                    }
                    Some("content_block_delta") => {
                        if let Ok(delta_event) = serde_json::from_value::<wire::ContentBlockDelta>(envelope.clone()) {
                            let tool_id = tool_call_ids.get(&delta_event.index).map(String::as_str);
                            yield Ok(wire::content_block_delta_to_canonical(
                                delta_event,
                                tool_id,
                                &stream_id,
                                &model,
                                created_unix,
                            ));
                        }
                    }
                    Some("message_delta") => {
                        if let Some(stop_reason) = envelope["delta"]["stop_reason"].as_str() {
                            yield Ok(crate::canonical::StreamChunk {
                                id: stream_id.clone(),
                                created_unix,
                                model: model.clone(),
                                choices: vec![crate::canonical::ChoiceDelta {
                                    index: 0,
                                    delta: crate::canonical::Delta::default(),
                                    finish_reason: Some(wire::stop_reason_to_finish_reason(stop_reason)),
                                }],
                                usage: None,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }))
    }

    async fn health(&self, credential: &ActiveCredential) -> Result<(), ProxyError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", &credential.secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| map_transport_error("anthropic", &e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_http_error("anthropic", response.status(), "", None))
        }
    }

    async fn list_models(&self, credential: &ActiveCredential) -> Result<Vec<String>, ProxyError> {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let secret = credential.secret.clone();
        self.models
            .get_or_fetch(|| async move {
                let response = client
                    .get(format!("{base_url}/models"))
                    .header("x-api-key", &secret)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .send()
                    .await
                    .map_err(|e| map_transport_error("anthropic", &e))?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| map_transport_error("anthropic", &e))?;
                Ok(body["data"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|m| m["id"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default())
            })
            .await
    }
}

pub fn new_connector(client: reqwest::Client) -> Arc<dyn BackendConnector> {
    Arc::new(AnthropicConnector::new(client))
}
