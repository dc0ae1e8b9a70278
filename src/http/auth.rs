//! Client authentication: accepts `Authorization: Bearer <key>`,
//! `x-api-key: <key>`, or `x-goog-api-key: <key>` (one dialect each),
//! checked against the configured `client_api_keys` allowlist.
//!
//! No teacher analogue (the teacher never sat behind an HTTP edge); the
//! header-juggling shape is the ordinary one every gateway in the pack
//! uses.

use axum::http::HeaderMap;

use crate::config::AppConfig;
use crate::error::ProxyError;

/// Extracts the client-presented API key, if any, from whichever header
/// the caller's dialect uses. Returns `Ok(None)` when auth is disabled
/// (dev mode); otherwise validates the key against the allowlist.
pub fn authenticate(headers: &HeaderMap, config: &AppConfig) -> Result<Option<String>, ProxyError> {
    if !config.auth_enabled {
        return Ok(extract_presented_key(headers));
    }

    let presented = extract_presented_key(headers).ok_or_else(|| ProxyError::Auth {
        backend: "client".to_string(),
        key_name: "missing".to_string(),
    })?;

    if config.client_api_keys.iter().any(|k| k == &presented) {
        Ok(Some(presented))
    } else {
        Err(ProxyError::Auth {
            backend: "client".to_string(),
            key_name: "invalid".to_string(),
        })
    }
}

fn extract_presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    if let Some(value) = headers.get("x-api-key") {
        if let Ok(s) = value.to_str() {
            return Some(s.trim().to_string());
        }
    }
    if let Some(value) = headers.get("x-goog-api-key") {
        if let Ok(s) = value.to_str() {
            return Some(s.trim().to_string());
        }
    }
    None
}

/// Reads `x-session-id`, generating a fresh id when the client didn't
/// send one. Sessions are keyed by this id regardless of which dialect
/// is in use, per the session & command engine contract.
pub fn session_id(headers: &HeaderMap) -> String {
    headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_with_keys(keys: &[&str]) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auth_enabled = true;
        cfg.client_api_keys = keys.iter().map(|s| s.to_string()).collect();
        cfg
    }

    #[test]
    fn bearer_token_is_accepted_when_allowlisted() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let cfg = config_with_keys(&["secret"]);
        assert_eq!(authenticate(&headers, &cfg).unwrap(), Some("secret".to_string()));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("nope"));
        let cfg = config_with_keys(&["secret"]);
        assert!(authenticate(&headers, &cfg).is_err());
    }

    #[test]
    fn missing_header_is_rejected_when_auth_enabled() {
        let headers = HeaderMap::new();
        let cfg = config_with_keys(&["secret"]);
        assert!(authenticate(&headers, &cfg).is_err());
    }

    #[test]
    fn auth_disabled_skips_the_allowlist_check() {
        let headers = HeaderMap::new();
        let mut cfg = AppConfig::default();
        cfg.auth_enabled = false;
        assert!(authenticate(&headers, &cfg).is_ok());
    }

    #[test]
    fn session_id_is_generated_when_absent() {
        let headers = HeaderMap::new();
        assert!(!session_id(&headers).is_empty());
    }

    #[test]
    fn session_id_is_echoed_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("abc-123"));
        assert_eq!(session_id(&headers), "abc-123");
    }
}
