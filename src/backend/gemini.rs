//! Gemini connector. HTTP/SSE plumbing grounded in the teacher's
//! `llm::gemini::GeminiProvider` (`x-goog-api-key` header,
//! `:streamGenerateContent?alt=sse` path), with the Code Assist
//! `v1internal:` OAuth variant added per the translation service's
//! dialect coverage (`spec.md` §4.2/§4.3) — the teacher never carried
//! Gemini OAuth at all, only a bare API key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::sse::{sse_events, SseEvent};
use crate::backend::{
    map_http_error, map_transport_error, ActiveCredential, BackendConnector, BackendStream,
    CredentialKind, ModelListCache,
};
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse};
use crate::error::ProxyError;
use crate::translate::gemini as wire;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const CODE_ASSIST_API_BASE: &str = "https://cloudcode-pa.googleapis.com/v1internal";

pub struct GeminiConnector {
    client: reqwest::Client,
    models: ModelListCache,
    next_call_id: std::sync::atomic::AtomicU64,
}

impl GeminiConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            models: ModelListCache::default(),
            next_call_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Gemini never assigns its own tool-call ids; synthesize a stable
    /// monotonic one per `functionCall` part, mirroring the teacher's
    /// `next_call_id`/`GeminiToolCallMeta` pattern.
    fn synthesize_call_id(&self) -> String {
        let n = self.next_call_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("call_{n}")
    }

    fn endpoint(&self, model: &str, method: &str, credential: &ActiveCredential) -> String {
        match credential.kind {
            CredentialKind::OAuth => {
                format!("{CODE_ASSIST_API_BASE}:{method}?alt=sse")
            }
            _ => format!("{GEMINI_API_BASE}/models/{model}:{method}?alt=sse"),
        }
    }

    async fn send(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
        method: &str,
    ) -> Result<reqwest::Response, ProxyError> {
        let wire_request = wire::request_to_wire(request)?;
        let url = self.endpoint(&request.model, method, credential);

        let mut builder = self.client.post(url).header("Content-Type", "application/json");
        builder = match credential.kind {
            CredentialKind::OAuth => builder.header("Authorization", format!("Bearer {}", credential.secret)),
            _ => builder.header("x-goog-api-key", &credential.secret),
        };

        let body = if credential.kind == CredentialKind::OAuth {
            serde_json::json!({
                "model": request.model,
                "project": credential.project_id,
                "request": wire_request,
            })
        } else {
            serde_json::to_value(&wire_request).map_err(|e| ProxyError::UpstreamProtocol {
                backend: "gemini".into(),
                message: e.to_string(),
            })?
        };

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("gemini", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("gemini", status, &body, None));
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendConnector for GeminiConnector {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn chat_completion(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<CanonicalChatResponse, ProxyError> {
        let response = self.send(request, credential, "generateContent").await?;
        let body: wire::GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("gemini", &e))?;

        let candidate = body
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| ProxyError::UpstreamProtocol {
                backend: "gemini".into(),
                message: "missing candidates".into(),
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(t) = &part.text {
                    text.push_str(t);
                }
                if let Some(call) = &part.function_call {
                    tool_calls.push(crate::canonical::ToolCall {
                        id: self.synthesize_call_id(),
                        name: call.name.clone(),
                        arguments: call.args.clone(),
                    });
                }
            }
        }

        Ok(CanonicalChatResponse {
            id: format!("gemini_{}", uuid::Uuid::new_v4()),
            created_unix: Utc::now().timestamp(),
            model: request.model.clone(),
            choices: vec![crate::canonical::Choice {
                index: 0,
                finish_reason: wire::parse_finish_reason(candidate.finish_reason.as_deref()),
                message: crate::canonical::Message {
                    role: crate::canonical::Role::Assistant,
                    content: crate::canonical::Content::Text(text),
                    tool_call_id: None,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                },
            }],
            usage: crate::canonical::CanonicalUsage {
                prompt_tokens: body.usage_metadata.as_ref().and_then(|u| u.prompt_token_count).unwrap_or(0),
                completion_tokens: body
                    .usage_metadata
                    .as_ref()
                    .and_then(|u| u.candidates_token_count)
                    .unwrap_or(0),
                total_tokens: body.usage_metadata.as_ref().map_or(0, |u| {
                    u.prompt_token_count.unwrap_or(0) + u.candidates_token_count.unwrap_or(0)
                }),
            },
        })
    }

    async fn chat_completion_stream(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<BackendStream, ProxyError> {
        let response = self.send(request, credential, "streamGenerateContent").await?;
        let byte_stream = Box::pin(response.bytes_stream());
        let events = sse_events(byte_stream, Duration::from_secs(30), "gemini");
        let model = request.model.clone();
        let stream_id = format!("gemini_{}", uuid::Uuid::new_v4());
        let created_unix = Utc::now().timestamp();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(
            self.next_call_id.load(std::sync::atomic::Ordering::Relaxed),
        ));

        Ok(Box::pin(async_stream::stream! {
            let mut events = events;
            use futures::StreamExt;
            while let Some(event) = events.next().await {
                let data = match event? {
                    SseEvent::Done => break,
                    SseEvent::Data(d) => d,
                };
                let parsed: wire::GenerateContentResponse = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        yield Err(ProxyError::UpstreamProtocol {
                            backend: "gemini".into(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                if let Some(candidate) = parsed.candidates.as_ref().and_then(|c| c.first()) {
                    let counter = counter.clone();
                    yield Ok(wire::candidate_to_canonical(
                        candidate,
                        move || format!("call_{}", counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)),
                        &stream_id,
                        &model,
                        created_unix,
                    ));
                }
            }
        }))
    }

    async fn health(&self, credential: &ActiveCredential) -> Result<(), ProxyError> {
        if credential.kind == CredentialKind::OAuth {
            // Code Assist has no unauthenticated model-listing probe;
            // treat a non-expired token as healthy and defer to the
            // credential manager's own validation pipeline.
            return Ok(());
        }
        let response = self
            .client
            .get(format!("{GEMINI_API_BASE}/models"))
            .header("x-goog-api-key", &credential.secret)
            .send()
            .await
            .map_err(|e| map_transport_error("gemini", &e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_http_error("gemini", response.status(), "", None))
        }
    }

    async fn list_models(&self, credential: &ActiveCredential) -> Result<Vec<String>, ProxyError> {
        if credential.kind == CredentialKind::OAuth {
            return Ok(vec!["gemini-3-pro-preview".to_string(), "gemini-3-flash-preview".to_string()]);
        }
        let client = self.client.clone();
        let secret = credential.secret.clone();
        self.models
            .get_or_fetch(|| async move {
                let response = client
                    .get(format!("{GEMINI_API_BASE}/models"))
                    .header("x-goog-api-key", &secret)
                    .send()
                    .await
                    .map_err(|e| map_transport_error("gemini", &e))?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| map_transport_error("gemini", &e))?;
                Ok(body["models"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|m| m["name"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default())
            })
            .await
    }
}

pub fn new_connector(client: reqwest::Client) -> Arc<dyn BackendConnector> {
    Arc::new(GeminiConnector::new(client))
}
