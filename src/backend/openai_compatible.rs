//! Generic OpenAI-wire-compatible connector for OpenRouter, Zhipu/ZAI,
//! and Qwen (`spec.md` §1's provider list) — same wire dialect as
//! OpenAI, but with base URL and auth header made configuration-driven
//! instead of the teacher's hardcoded `OPENAI_API_BASE`/bearer header.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::sse::{sse_events, SseEvent};
use crate::backend::{map_http_error, map_transport_error, ActiveCredential, BackendConnector, BackendStream, ModelListCache};
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse};
use crate::error::ProxyError;
use crate::translate::openai as wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    XApiKey,
}

pub struct OpenAICompatibleConnector {
    client: reqwest::Client,
    name: &'static str,
    base_url: String,
    auth_style: AuthStyle,
    models: ModelListCache,
}

impl OpenAICompatibleConnector {
    pub fn new(client: reqwest::Client, name: &'static str, base_url: String, auth_style: AuthStyle) -> Self {
        Self {
            client,
            name,
            base_url,
            auth_style,
            models: ModelListCache::default(),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder, credential: &ActiveCredential) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer => builder.header("Authorization", format!("Bearer {}", credential.secret)),
            AuthStyle::XApiKey => builder.header("x-api-key", &credential.secret),
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

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        let response = self
            .apply_auth(builder, credential)
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| map_transport_error(self.name, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(self.name, status, &body, retry_after));
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendConnector for OpenAICompatibleConnector {
    fn name(&self) -> &'static str {
        self.name
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
            .map_err(|e| map_transport_error(self.name, &e))?;

        let first = body["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProxyError::UpstreamProtocol {
                backend: self.name.to_string(),
                message: "missing choices array".into(),
            })?;
        let message_json = &first["message"];

        Ok(CanonicalChatResponse {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            created_unix: body["created"].as_i64().unwrap_or_else(|| Utc::now().timestamp()),
            model: body["model"].as_str().unwrap_or(&request.model).to_string(),
            choices: vec![crate::canonical::Choice {
                index: 0,
                finish_reason: wire::finish_reason_from_wire(
                    first["finish_reason"].as_str().unwrap_or("stop"),
                ),
                message: crate::canonical::Message {
                    role: crate::canonical::Role::Assistant,
                    content: crate::canonical::Content::Text(
                        message_json["content"].as_str().unwrap_or_default().to_string(),
                    ),
                    tool_call_id: None,
                    tool_calls: message_json["tool_calls"].as_array().map(|calls| {
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
                    }),
                },
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
        let events = sse_events(byte_stream, Duration::from_secs(30), self.name);
        let model = request.model.clone();
        let name = self.name;
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
                                    backend: name.to_string(),
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
        let builder = self.client.get(format!("{}/models", self.base_url));
        let response = self
            .apply_auth(builder, credential)
            .send()
            .await
            .map_err(|e| map_transport_error(self.name, &e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_http_error(self.name, response.status(), "", None))
        }
    }

    async fn list_models(&self, credential: &ActiveCredential) -> Result<Vec<String>, ProxyError> {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let auth_style = self.auth_style;
        let secret = credential.secret.clone();
        let name = self.name;
        self.models
            .get_or_fetch(|| async move {
                let builder = client.get(format!("{base_url}/models"));
                let builder = match auth_style {
                    AuthStyle::Bearer => builder.header("Authorization", format!("Bearer {secret}")),
                    AuthStyle::XApiKey => builder.header("x-api-key", &secret),
                };
                let response = builder.send().await.map_err(|e| map_transport_error(name, &e))?;
                let body: serde_json::Value = response.json().await.map_err(|e| map_transport_error(name, &e))?;
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

pub fn new_connector(
    client: reqwest::Client,
    name: &'static str,
    base_url: String,
    auth_style: AuthStyle,
) -> Arc<dyn BackendConnector> {
    Arc::new(OpenAICompatibleConnector::new(client, name, base_url, auth_style))
}
