//! OpenAI connector. HTTP/SSE plumbing grounded in the teacher's
//! `llm::openai::OpenAIProvider` (`reqwest::Client`, bearer auth header,
//! `/chat/completions` path), retargeted to the canonical model and the
//! shared `backend::sse` idle-timeout helper instead of a hand-rolled
//! `async_stream::stream!` SSE loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::sse::{sse_events, SseEvent};
use crate::backend::{map_http_error, map_transport_error, ActiveCredential, BackendConnector, BackendStream, ModelListCache};
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse};
use crate::error::ProxyError;
use crate::translate::openai as wire;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIConnector {
    client: reqwest::Client,
    base_url: String,
    models: ModelListCache,
}

impl OpenAIConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: OPENAI_API_BASE.to_string(),
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
        wire_request.stream = stream;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", credential.secret))
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| map_transport_error("openai", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("openai", status, &body, retry_after));
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendConnector for OpenAIConnector {
    fn name(&self) -> &'static str {
        "openai"
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
            .map_err(|e| map_transport_error("openai", &e))?;

        let choices = body["choices"]
            .as_array()
            .ok_or_else(|| ProxyError::UpstreamProtocol {
                backend: "openai".into(),
                message: "missing choices array".into(),
            })?;
        let first = choices.first().ok_or_else(|| ProxyError::UpstreamProtocol {
            backend: "openai".into(),
            message: "empty choices array".into(),
        })?;

        let message_json = &first["message"];
        let tool_calls: Option<Vec<crate::canonical::ToolCall>> = message_json["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| crate::canonical::ToolCall {
                        id: c["id"].as_str().unwrap_or_default().to_string(),
                        name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments: serde_json::from_str(
                            c["function"]["arguments"].as_str().unwrap_or("{}"),
                        )
                        .unwrap_or(serde_json::Value::Null),
                    })
                    .collect()
            })
            .filter(|v: &Vec<_>| !v.is_empty());

        let message = crate::canonical::Message {
            role: crate::canonical::Role::Assistant,
            content: crate::canonical::Content::Text(
                message_json["content"].as_str().unwrap_or_default().to_string(),
            ),
            tool_call_id: None,
            tool_calls,
        };

        Ok(CanonicalChatResponse {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            created_unix: body["created"].as_i64().unwrap_or_else(|| Utc::now().timestamp()),
            model: body["model"].as_str().unwrap_or(&request.model).to_string(),
            choices: vec![crate::canonical::Choice {
                index: 0,
                finish_reason: wire::finish_reason_from_wire(
                    first["finish_reason"].as_str().unwrap_or("stop"),
                ),
                message,
            }],
            usage: crate::canonical::CanonicalUsage {
                prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: body["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
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
        let events = sse_events(byte_stream, Duration::from_secs(30), "openai");
        let model = request.model.clone();
        let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let created_unix = Utc::now().timestamp();

        Ok(Box::pin(async_stream::stream! {
            let mut events = events;
            use futures::StreamExt;
            while let Some(event) = events.next().await {
                match event? {
                    SseEvent::Done => break,
                    SseEvent::Data(data) => {
                        let chunk: wire::ChatCompletionChunk = match serde_json::from_str(&data) {
                            Ok(c) => c,
                            Err(e) => {
                                yield Err(ProxyError::UpstreamProtocol {
                                    backend: "openai".into(),
                                    message: e.to_string(),
                                });
                                continue;
                            }
                        };
                        yield Ok(wire::chunk_to_canonical(chunk, &stream_id, &model, created_unix));
                    }
                }
            }
        }))
    }

    async fn health(&self, credential: &ActiveCredential) -> Result<(), ProxyError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", credential.secret))
            .send()
            .await
            .map_err(|e| map_transport_error("openai", &e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_http_error("openai", response.status(), "", None))
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
                    .header("Authorization", format!("Bearer {secret}"))
                    .send()
                    .await
                    .map_err(|e| map_transport_error("openai", &e))?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| map_transport_error("openai", &e))?;
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
    Arc::new(OpenAIConnector::new(client))
}
