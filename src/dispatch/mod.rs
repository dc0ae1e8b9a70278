//! Dispatcher: expands a route or `backend:model` literal into an
//! attempt sequence, then executes attempts strictly sequentially with
//! rate-limiter and credential-health pre-checks, stopping at the first
//! success or the sequence's exhaustion.

pub mod attempt_log;
pub mod failover;
pub mod rate_limiter;

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;

use crate::backend::{ActiveCredential, BackendConnector, BackendRegistry, BackendStream};
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse};
use crate::config::{AppConfig, RateLimitConfig};
use crate::error::ProxyError;
use crate::telemetry::{WireCaptureEntry, WireCaptureLog, WireDirection};
use attempt_log::{AllAttemptsFailed, AttemptLog, AttemptOutcome};
use failover::AttemptSpec;
use rate_limiter::RateLimiter;

/// What the dispatcher needs from the credential manager per attempt:
/// resolve a `(backend, key_name)` pair to an `ActiveCredential` if (and
/// only if) it is currently functional. Implemented by
/// `credentials::CredentialManager`; defined here since the dispatcher
/// is this capability's first consumer.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self, backend: &str, key_name: &str) -> Option<ActiveCredential>;

    /// Mark `(backend, key_name)` unhealthy after an `Auth` failure.
    /// Default no-op so test doubles don't need to implement it.
    async fn record_failure(&self, _backend: &str, _key_name: &str, _reason: &str) {}
}

pub struct Dispatcher {
    registry: BackendRegistry,
    credentials: Arc<dyn CredentialSource>,
    rate_limiter: RateLimiter,
    rate_limit_scope: String,
    wire_capture: Arc<WireCaptureLog>,
}

pub enum DispatchOutcome {
    Response(CanonicalChatResponse, AttemptLog),
    Stream(BackendStream, AttemptLog),
}

impl Dispatcher {
    pub fn new(
        registry: BackendRegistry,
        credentials: Arc<dyn CredentialSource>,
        rate_limit: &RateLimitConfig,
        wire_capture: Arc<WireCaptureLog>,
    ) -> Self {
        Self {
            registry,
            credentials,
            rate_limiter: RateLimiter::new(rate_limit.limit, rate_limit.window_seconds),
            rate_limit_scope: rate_limit.scope.clone(),
            wire_capture,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Resolve `model` (a route name, or `backend:model` literal, or an
    /// explicit one-off route) into its attempt sequence.
    pub fn build_attempts(
        &self,
        model: &str,
        oneoff: Option<&crate::session::state::OneoffRoute>,
        config: &AppConfig,
    ) -> Vec<AttemptSpec> {
        if let Some(oneoff) = oneoff {
            return failover::expand_single(&oneoff.backend, &oneoff.model, &config.backends);
        }
        if let Some((backend, bare_model)) = model.split_once(':') {
            if config.backends.contains_key(backend) {
                return failover::expand_single(backend, bare_model, &config.backends);
            }
        }
        if let Some(route) = config.failover_routes.get(model) {
            return failover::expand_route(route, &config.backends);
        }
        Vec::new()
    }

    pub async fn dispatch(
        &self,
        mut request: CanonicalChatRequest,
        attempts: Vec<AttemptSpec>,
        client_api_key: Option<&str>,
        session_id: &str,
    ) -> Result<DispatchOutcome, AllAttemptsFailed> {
        let mut log = AttemptLog::new();

        for attempt in &attempts {
            let scope = rate_limiter::scope_key(
                &self.rate_limit_scope,
                &attempt.backend,
                &attempt.key_name,
                client_api_key,
            );
            if self.rate_limiter.try_acquire(&scope).is_err() {
                log.record_skip(&attempt.backend, &attempt.model, AttemptOutcome::SkippedRateLimited);
                continue;
            }
            log.rate_limit_budget = Some((self.rate_limiter.limit(), self.rate_limiter.remaining(&scope)));

            let Some(credential) = self.credentials.resolve(&attempt.backend, &attempt.key_name).await else {
                log.record_skip(&attempt.backend, &attempt.model, AttemptOutcome::SkippedUnhealthyCredential);
                continue;
            };

            let Some(connector) = self.registry.get(&attempt.backend) else {
                log.record_skip(&attempt.backend, &attempt.model, AttemptOutcome::SkippedUnhealthyCredential);
                continue;
            };

            request.model = attempt.model.clone();

            self.wire_capture
                .record(&WireCaptureEntry::new(
                    WireDirection::OutboundRequest,
                    attempt.backend.as_str(),
                    attempt.model.as_str(),
                    session_id,
                    serde_json::to_value(&request).unwrap_or(serde_json::Value::Null),
                ))
                .await;

            if request.stream {
                match connector.chat_completion_stream(&request, &credential).await {
                    Ok(stream) => {
                        log.record_success(&attempt.backend, &attempt.model, &attempt.key_name);
                        self.wire_capture
                            .record(&WireCaptureEntry::new(
                                WireDirection::StreamStart,
                                attempt.backend.as_str(),
                                attempt.model.as_str(),
                                session_id,
                                serde_json::Value::Null,
                            ))
                            .await;
                        let stream = wrap_stream_with_wire_capture(
                            self.wire_capture.clone(),
                            attempt.backend.clone(),
                            attempt.model.clone(),
                            session_id.to_string(),
                            stream,
                        );
                        return Ok(DispatchOutcome::Stream(stream, log));
                    }
                    Err(err) => {
                        if let ProxyError::Auth { backend, key_name } = &err {
                            self.credentials.record_failure(backend, key_name, &err.to_string()).await;
                        }
                        log.record_failure(&attempt.backend, &attempt.model, &attempt.key_name, &err);
                        if !err.is_failover_eligible() {
                            return Err(AllAttemptsFailed { log });
                        }
                    }
                }
            } else {
                match connector.chat_completion(&request, &credential).await {
                    Ok(response) => {
                        log.record_success(&attempt.backend, &attempt.model, &attempt.key_name);
                        self.wire_capture
                            .record(&WireCaptureEntry::new(
                                WireDirection::InboundResponse,
                                attempt.backend.as_str(),
                                attempt.model.as_str(),
                                session_id,
                                serde_json::to_value(&response).unwrap_or(serde_json::Value::Null),
                            ))
                            .await;
                        return Ok(DispatchOutcome::Response(response, log));
                    }
                    Err(err) => {
                        if let ProxyError::Auth { backend, key_name } = &err {
                            self.credentials.record_failure(backend, key_name, &err.to_string()).await;
                        }
                        log.record_failure(&attempt.backend, &attempt.model, &attempt.key_name, &err);
                        if !err.is_failover_eligible() {
                            return Err(AllAttemptsFailed { log });
                        }
                    }
                }
            }
        }

        Err(AllAttemptsFailed { log })
    }
}

/// Wraps a connector's raw stream so every chunk is appended to the
/// wire-capture log as it passes through, with a terminal `StreamEnd`
/// entry once the upstream sequence is exhausted (error or not) -
/// recorded ahead of the response pipeline's own middleware chain so
/// the capture reflects what the connector actually produced.
fn wrap_stream_with_wire_capture(
    wire_capture: Arc<WireCaptureLog>,
    backend: String,
    model: String,
    session_id: String,
    stream: BackendStream,
) -> BackendStream {
    let out = async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let payload = match &item {
                Ok(chunk) => serde_json::to_value(chunk).unwrap_or(serde_json::Value::Null),
                Err(err) => serde_json::json!({"error": err.to_string()}),
            };
            wire_capture
                .record(&WireCaptureEntry::new(
                    WireDirection::StreamChunk,
                    backend.as_str(),
                    model.as_str(),
                    session_id.as_str(),
                    payload,
                ))
                .await;
            yield item;
        }
        wire_capture
            .record(&WireCaptureEntry::new(
                WireDirection::StreamEnd,
                backend.as_str(),
                model.as_str(),
                session_id.as_str(),
                serde_json::Value::Null,
            ))
            .await;
    };
    Box::pin(out)
}

/// Build the registry of connectors from config, one per configured
/// backend, sharing a single pooled `reqwest::Client` per
/// `spec.md` §4.3 / testable property 7.
pub fn build_registry(client: reqwest::Client, backends: &HashMap<String, crate::config::BackendConfig>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for (name, cfg) in backends {
        let connector: Arc<dyn BackendConnector> = match cfg.kind.as_str() {
            "openai" => crate::backend::openai::new_connector(client.clone()),
            "anthropic" => crate::backend::anthropic::new_connector(client.clone()),
            "gemini" => crate::backend::gemini::new_connector(client.clone()),
            "openai_compatible" => crate::backend::openai_compatible::new_connector(
                client.clone(),
                Box::leak(name.clone().into_boxed_str()),
                cfg.api_url.clone(),
                crate::backend::openai_compatible::AuthStyle::Bearer,
            ),
            other => {
                tracing::warn!(backend = name.as_str(), kind = other, "unknown backend kind, skipping");
                continue;
            }
        };
        registry = registry.register(name.clone(), connector);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, BackendKeyConfig};

    fn cfg_with_single_backend() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.backends.insert(
            "openai".to_string(),
            BackendConfig {
                kind: "openai".into(),
                api_url: "https://api.openai.com/v1".into(),
                api_keys: vec![BackendKeyConfig { name: "k1".into(), secret: "sk-1".into() }],
                project_id: None,
                oauth_credentials_path: None,
            },
        );
        cfg
    }

    #[test]
    fn backend_colon_model_literal_expands_to_single_backend() {
        let registry = BackendRegistry::new();
        struct NoCreds;
        #[async_trait::async_trait]
        impl CredentialSource for NoCreds {
            async fn resolve(&self, _: &str, _: &str) -> Option<ActiveCredential> {
                None
            }
        }
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(NoCreds),
            &RateLimitConfig::default(),
            Arc::new(WireCaptureLog::disabled()),
        );
        let cfg = cfg_with_single_backend();
        let attempts = dispatcher.build_attempts("openai:gpt-4", None, &cfg);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].backend, "openai");
        assert_eq!(attempts[0].model, "gpt-4");
    }
}
