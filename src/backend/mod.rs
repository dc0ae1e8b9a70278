//! Backend connectors: one per upstream wire dialect, sharing a pooled
//! `reqwest::Client` and the canonical model.
//!
//! The common contract (`chat_completion`, `list_models`, `health`) is
//! grounded in the teacher's `llm::provider::LLMProvider` trait, trimmed
//! to what a proxy (rather than an interactive agent) needs: no
//! `chat_loop`/`compact`/tool-execution orchestration, since the proxy
//! forwards `tool_calls` to the client untouched instead of running a
//! local agent loop.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openai_compatible;
pub mod sse;

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Mutex;

use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse, StreamChunk};
use crate::error::ProxyError;

/// What a connector needs from the credential manager to make one call:
/// the secret plus a stable name for logging and rate-limit scoping.
/// Defined here (at the point of use, per the teacher's habit of
/// defining a trait next to its first consumer) and implemented by
/// `credentials::CredentialManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    OAuth,
    Cert,
}

#[derive(Debug, Clone)]
pub struct ActiveCredential {
    pub key_name: String,
    pub secret: String,
    pub kind: CredentialKind,
    /// Present for `OAuth` credentials routed through Gemini Code Assist;
    /// `generateContent`'s `v1internal:` variant is keyed by project
    /// rather than API key.
    pub project_id: Option<String>,
}

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProxyError>> + Send>>;

#[async_trait]
pub trait BackendConnector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat_completion(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<CanonicalChatResponse, ProxyError>;

    async fn chat_completion_stream(
        &self,
        request: &CanonicalChatRequest,
        credential: &ActiveCredential,
    ) -> Result<BackendStream, ProxyError>;

    /// Cheap health probe. Implementations delegate credential validity
    /// to the credential manager and only check reachability here.
    async fn health(&self, credential: &ActiveCredential) -> Result<(), ProxyError>;

    /// Cached model listing, 5-minute TTL per the backend connector spec.
    async fn list_models(&self, credential: &ActiveCredential) -> Result<Vec<String>, ProxyError>;
}

/// Wraps a connector's `list_models` with the 5-minute TTL cache every
/// connector needs, so the cache lives in one place instead of being
/// reimplemented per provider.
pub struct ModelListCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, Vec<String>)>>,
}

impl ModelListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Vec<String>, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<String>, ProxyError>>,
    {
        let mut guard = self.cached.lock().await;
        if let Some((fetched_at, models)) = guard.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(models.clone());
            }
        }
        let models = fetch().await?;
        *guard = Some((Instant::now(), models.clone()));
        Ok(models)
    }
}

impl Default for ModelListCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Name -> connector map, built once at startup from `AppConfig.backends`.
pub struct BackendRegistry {
    connectors: std::collections::HashMap<String, Arc<dyn BackendConnector>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            connectors: std::collections::HashMap::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>, connector: Arc<dyn BackendConnector>) -> Self {
        self.connectors.insert(name.into(), connector);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendConnector>> {
        self.connectors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Upstream client HTTP error -> `ProxyError`, the five-case table from
/// the backend connector spec: 401/403 -> `Auth`, 429 -> `RateLimit`
/// (parsing `Retry-After` if present), 5xx -> `UpstreamTransient`, other
/// 4xx -> `UpstreamClient`, transport/timeout -> `UpstreamTransient`.
pub fn map_http_error(
    backend: &str,
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> ProxyError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProxyError::Auth {
            backend: backend.to_string(),
            key_name: "unknown".to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => ProxyError::RateLimit { retry_after },
        s if s.is_server_error() => ProxyError::UpstreamTransient {
            backend: backend.to_string(),
            message: body.to_string(),
            retry_after,
        },
        _ => ProxyError::UpstreamClient {
            backend: backend.to_string(),
            message: body.to_string(),
        },
    }
}

pub fn map_transport_error(backend: &str, err: &reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout {
            scope: format!("{backend}_request"),
        }
    } else {
        ProxyError::UpstreamTransient {
            backend: backend.to_string(),
            message: err.to_string(),
            retry_after: None,
        }
    }
}
