//! Credential lifecycle: startup validation, health tracking with a
//! throttled re-check after failures, and file-watch reload for
//! OAuth-backed backends.
//!
//! No teacher analogue (the teacher reads a single API key from an env
//! var once at startup and never revisits it); grounded on the
//! `dashmap` concurrent-map pattern used throughout the pack for shared
//! hot-path state, plus the `notify` watcher pattern in
//! `credentials::watcher`.

pub mod file;
pub mod watcher;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::backend::{ActiveCredential, CredentialKind};
use crate::config::{AppConfig, BackendConfig};
use crate::dispatch::CredentialSource;
use crate::error::ProxyError;
use file::OAuthCredentials;

const DEFAULT_MIN_RECHECK_SECONDS: i64 = 30;
const OAUTH_REFRESH_SKEW_SECONDS: i64 = 120;

#[derive(Debug, Clone)]
struct HealthState {
    functional: bool,
    last_error: Option<String>,
    last_checked_unix: i64,
}

struct CredentialEntry {
    secret: Mutex<String>,
    kind: CredentialKind,
    project_id: Mutex<Option<String>>,
    expiry_unix: Mutex<Option<i64>>,
    oauth_path: Option<std::path::PathBuf>,
    health: Mutex<HealthState>,
}

/// Owns every backend's credentials and their current health. Cloning
/// is cheap (everything behind `Arc`); share one instance across the
/// dispatcher and the HTTP layer's admin/health routes.
#[derive(Clone)]
pub struct CredentialManager {
    entries: Arc<DashMap<(String, String), Arc<CredentialEntry>>>,
    min_recheck_seconds: i64,
    _watch_handles: Arc<Vec<watcher::FileWatchHandle>>,
}

impl CredentialManager {
    /// Builds the manager from config, validating every credential at
    /// startup: API keys need only be non-empty; OAuth credential files
    /// must exist, parse, and not be already expired without a refresh
    /// token available. Fails fast (the startup guardrail) if not a
    /// single backend ends up with a functional credential.
    pub fn startup(config: &AppConfig) -> Result<Self, ProxyError> {
        let entries: DashMap<(String, String), Arc<CredentialEntry>> = DashMap::new();
        let mut watch_handles = Vec::new();
        let now = Utc::now().timestamp();

        for (backend_name, backend_cfg) in &config.backends {
            for key in &backend_cfg.api_keys {
                let functional = !key.secret.trim().is_empty();
                let entry = Arc::new(CredentialEntry {
                    secret: Mutex::new(key.secret.clone()),
                    kind: CredentialKind::ApiKey,
                    project_id: Mutex::new(backend_cfg.project_id.clone()),
                    expiry_unix: Mutex::new(None),
                    oauth_path: None,
                    health: Mutex::new(HealthState {
                        functional,
                        last_error: if functional {
                            None
                        } else {
                            Some("empty secret".to_string())
                        },
                        last_checked_unix: now,
                    }),
                });
                entries.insert((backend_name.clone(), key.name.clone()), entry);
            }

            if let Some(oauth_path) = &backend_cfg.oauth_credentials_path {
                let key_name = "oauth".to_string();
                let (functional, creds, error) = match OAuthCredentials::load(oauth_path) {
                    Ok(creds) => {
                        let expired = creds.is_expired(now) && creds.refresh_token.is_none();
                        (!expired, Some(creds), None)
                    }
                    Err(err) => (false, None, Some(err.to_string())),
                };

                let entry = Arc::new(CredentialEntry {
                    secret: Mutex::new(creds.as_ref().map(|c| c.access_token.clone()).unwrap_or_default()),
                    kind: CredentialKind::OAuth,
                    project_id: Mutex::new(
                        creds
                            .as_ref()
                            .and_then(|c| c.project_id.clone())
                            .or_else(|| backend_cfg.project_id.clone()),
                    ),
                    expiry_unix: Mutex::new(creds.as_ref().map(|c| c.expiry_unix)),
                    oauth_path: Some(oauth_path.clone()),
                    health: Mutex::new(HealthState {
                        functional,
                        last_error: error,
                        last_checked_unix: now,
                    }),
                });
                entries.insert((backend_name.clone(), key_name.clone()), entry.clone());

                let watch_path = oauth_path.clone();
                let watch_backend = backend_name.clone();
                let watch_entry = entry.clone();
                if let Ok(handle) = watcher::watch_file(watch_path.clone(), move || {
                    match OAuthCredentials::load(&watch_path) {
                        Ok(creds) => {
                            tracing::info!(backend = watch_backend.as_str(), "reloaded oauth credentials from disk");
                            let now = Utc::now().timestamp();
                            let expired = creds.is_expired(now) && creds.refresh_token.is_none();
                            if let Ok(mut secret) = watch_entry.secret.try_lock() {
                                *secret = creds.access_token.clone();
                            }
                            if let Ok(mut expiry) = watch_entry.expiry_unix.try_lock() {
                                *expiry = Some(creds.expiry_unix);
                            }
                            if let Ok(mut health) = watch_entry.health.try_lock() {
                                health.functional = !expired;
                                health.last_error = if expired {
                                    Some("oauth credentials expired".to_string())
                                } else {
                                    None
                                };
                                health.last_checked_unix = now;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(backend = watch_backend.as_str(), error = %err, "failed to reload oauth credentials");
                        }
                    }
                }) {
                    watch_handles.push(handle);
                }
            }
        }

        let functional_count = entries.iter().filter(|e| {
            e.value().health.try_lock().map(|h| h.functional).unwrap_or(false)
        }).count();

        if functional_count == 0 {
            return Err(ProxyError::NoFunctionalBackend);
        }

        Ok(Self {
            entries: Arc::new(entries),
            min_recheck_seconds: DEFAULT_MIN_RECHECK_SECONDS,
            _watch_handles: Arc::new(watch_handles),
        })
    }

    /// Marks `(backend, key_name)` unhealthy after a failed call. Called
    /// by the dispatcher on an `Auth` error.
    pub async fn record_failure(&self, backend: &str, key_name: &str, reason: &str) {
        if let Some(entry) = self.entries.get(&(backend.to_string(), key_name.to_string())) {
            let mut health = entry.health.lock().await;
            health.functional = false;
            health.last_error = Some(reason.to_string());
            health.last_checked_unix = Utc::now().timestamp();
        }
    }

    /// Defensive copy of every unhealthy credential's last error, for
    /// the `/health` route.
    pub async fn get_errors(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for entry in self.entries.iter() {
            let health = entry.value().health.lock().await;
            if !health.functional {
                if let Some(reason) = &health.last_error {
                    let (backend, key_name) = entry.key();
                    out.insert(format!("{backend}:{key_name}"), reason.clone());
                }
            }
        }
        out
    }

    pub async fn functional_backend_count(&self) -> usize {
        let mut count = 0;
        for entry in self.entries.iter() {
            if entry.value().health.lock().await.functional {
                count += 1;
            }
        }
        count
    }
}

#[async_trait::async_trait]
impl CredentialSource for CredentialManager {
    async fn resolve(&self, backend: &str, key_name: &str) -> Option<ActiveCredential> {
        let entry = self.entries.get(&(backend.to_string(), key_name.to_string()))?.clone();

        let now = Utc::now().timestamp();
        let mut health = entry.health.lock().await;

        if !health.functional {
            // Throttled re-check: give a previously-failed credential
            // another chance after the cooldown instead of blacklisting
            // it forever. A further failure re-marks it unhealthy via
            // `record_failure`.
            if now - health.last_checked_unix < self.min_recheck_seconds {
                return None;
            }
            health.last_checked_unix = now;
            health.functional = true;
            health.last_error = None;
        }
        drop(health);

        if entry.kind == CredentialKind::OAuth {
            let expiry = *entry.expiry_unix.lock().await;
            if let Some(expiry) = expiry {
                if now >= expiry - OAUTH_REFRESH_SKEW_SECONDS {
                    // No live refresh call is wired up (see DESIGN.md's
                    // Credential Manager entry); surface as unhealthy
                    // rather than send a token the backend will reject.
                    // A replacement credential file still reaches this
                    // backend through the file-watch reload path.
                    let mut health = entry.health.lock().await;
                    health.functional = false;
                    health.last_error = Some("oauth token near or past expiry".to_string());
                    return None;
                }
            }
        }

        Some(ActiveCredential {
            key_name: key_name.to_string(),
            secret: entry.secret.lock().await.clone(),
            kind: entry.kind,
            project_id: entry.project_id.lock().await.clone(),
        })
    }
}

/// Picks the first `(backend, key_name)` pair for each configured
/// backend, used by callers that just need any valid credential name
/// (e.g. building an attempt's default key before failover expansion
/// picks a specific one).
pub fn first_key_name(backends: &HashMap<String, BackendConfig>, backend: &str) -> Option<String> {
    backends.get(backend)?.api_keys.first().map(|k| k.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKeyConfig;

    fn config_with_one_key(secret: &str) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.backends.insert(
            "openai".to_string(),
            BackendConfig {
                kind: "openai".into(),
                api_url: "https://api.openai.com/v1".into(),
                api_keys: vec![BackendKeyConfig {
                    name: "k1".into(),
                    secret: secret.into(),
                }],
                project_id: None,
                oauth_credentials_path: None,
            },
        );
        cfg
    }

    #[tokio::test]
    async fn startup_fails_when_every_credential_is_empty() {
        let cfg = config_with_one_key("");
        assert!(CredentialManager::startup(&cfg).is_err());
    }

    #[tokio::test]
    async fn resolve_returns_credential_for_healthy_key() {
        let cfg = config_with_one_key("sk-test");
        let manager = CredentialManager::startup(&cfg).unwrap();
        let cred = manager.resolve("openai", "k1").await;
        assert!(cred.is_some());
        assert_eq!(cred.unwrap().secret, "sk-test");
    }

    #[tokio::test]
    async fn resolve_returns_none_right_after_a_failure() {
        let cfg = config_with_one_key("sk-test");
        let manager = CredentialManager::startup(&cfg).unwrap();
        manager.record_failure("openai", "k1", "401 unauthorized").await;
        assert!(manager.resolve("openai", "k1").await.is_none());
    }

    #[tokio::test]
    async fn get_errors_reports_unhealthy_credentials() {
        let cfg = config_with_one_key("sk-test");
        let manager = CredentialManager::startup(&cfg).unwrap();
        manager.record_failure("openai", "k1", "401 unauthorized").await;
        let errors = manager.get_errors().await;
        assert_eq!(errors.get("openai:k1").map(String::as_str), Some("401 unauthorized"));
    }
}
