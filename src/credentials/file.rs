//! On-disk OAuth credential file format, used by backends that route
//! through a Code Assist style OAuth flow (Gemini's `v1internal:`
//! variant) instead of a plain API key.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expiry_unix: i64,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl OAuthCredentials {
    pub fn load(path: &Path) -> Result<Self, ProxyError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Internal(format!("reading oauth credentials file {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| ProxyError::Internal(format!("parsing oauth credentials file {}: {e}", path.display())))
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix >= self.expiry_unix
    }

    /// Within the refresh window but not yet expired. Re-checked at the
    /// manager's throttled interval rather than on every request.
    pub fn near_expiry(&self, now_unix: i64, skew_seconds: i64) -> bool {
        now_unix + skew_seconds >= self.expiry_unix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_when_past_expiry_unix() {
        let creds = OAuthCredentials {
            access_token: "t".into(),
            refresh_token: None,
            expiry_unix: 1000,
            project_id: None,
        };
        assert!(creds.is_expired(1001));
        assert!(!creds.is_expired(999));
    }

    #[test]
    fn near_expiry_within_skew_window() {
        let creds = OAuthCredentials {
            access_token: "t".into(),
            refresh_token: None,
            expiry_unix: 1000,
            project_id: None,
        };
        assert!(creds.near_expiry(950, 60));
        assert!(!creds.near_expiry(500, 60));
    }
}
