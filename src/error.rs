//! Crate-wide error taxonomy.
//!
//! Mirrors the kinds enumerated in the proxy's error handling design:
//! every variant maps to a stable `type` string and HTTP status for the
//! uniform JSON error body returned at the HTTP edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed for backend {backend}, key {key_name}")]
    Auth { backend: String, key_name: String },

    #[error("rate limited, retry_after={retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("upstream {backend} transient error: {message}")]
    UpstreamTransient {
        backend: String,
        message: String,
        retry_after: Option<u64>,
    },

    #[error("upstream {backend} client error: {message}")]
    UpstreamClient { backend: String, message: String },

    #[error("upstream {backend} protocol error: {message}")]
    UpstreamProtocol { backend: String, message: String },

    #[error("translation unsupported: field {field} in dialect {dialect}")]
    Translation { field: String, dialect: String },

    #[error("loop detected: {reason}")]
    LoopDetected { reason: String },

    #[error("timeout exceeded: {scope}")]
    Timeout { scope: String },

    #[error("command error: {0}")]
    Command(String),

    #[error("no functional backend available")]
    NoFunctionalBackend,

    #[error("unknown model or route: {0}")]
    UnknownRoute(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Validation(_) => "validation_error",
            ProxyError::Auth { .. } => "authentication_error",
            ProxyError::RateLimit { .. } => "rate_limit_error",
            ProxyError::UpstreamTransient { .. }
            | ProxyError::UpstreamClient { .. }
            | ProxyError::UpstreamProtocol { .. } => "backend_error",
            ProxyError::Translation { .. } => "validation_error",
            ProxyError::LoopDetected { .. } => "loop_detected",
            ProxyError::Timeout { .. } => "backend_error",
            ProxyError::Command(_) => "command_error",
            ProxyError::NoFunctionalBackend => "upstream_unavailable",
            ProxyError::UnknownRoute(_) => "validation_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) | ProxyError::Translation { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Auth { .. } => StatusCode::UNAUTHORIZED,
            ProxyError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamClient { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTransient { .. } | ProxyError::UpstreamProtocol { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::LoopDetected { .. } => StatusCode::OK,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Command(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoFunctionalBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether an attempt that failed with this error is eligible for
    /// failover to the next attempt in a route's sequence.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            ProxyError::Auth { .. }
                | ProxyError::RateLimit { .. }
                | ProxyError::UpstreamTransient { .. }
        )
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.error_type();
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                kind,
                details: None,
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
