//! Per-request attempt log: one entry per attempt in a route's
//! sequence, kept for the final error body when every attempt fails.

use crate::error::ProxyError;

#[derive(Debug, Clone)]
pub struct Attempt {
    pub backend: String,
    pub model: String,
    pub key_name: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success,
    Failed { error_type: String, message: String },
    SkippedRateLimited,
    SkippedUnhealthyCredential,
}

#[derive(Debug, Default)]
pub struct AttemptLog {
    pub attempts: Vec<Attempt>,
    /// `(limit, remaining)` for the rate-limiter scope of whichever
    /// attempt ultimately succeeded, surfaced as `x-ratelimit-*`
    /// response headers.
    pub rate_limit_budget: Option<(u64, u64)>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, backend: &str, model: &str, key_name: &str, error: &ProxyError) {
        self.attempts.push(Attempt {
            backend: backend.to_string(),
            model: model.to_string(),
            key_name: key_name.to_string(),
            outcome: AttemptOutcome::Failed {
                error_type: error.error_type().to_string(),
                message: error.to_string(),
            },
        });
    }

    pub fn record_skip(&mut self, backend: &str, model: &str, outcome: AttemptOutcome) {
        self.attempts.push(Attempt {
            backend: backend.to_string(),
            model: model.to_string(),
            key_name: String::new(),
            outcome,
        });
    }

    pub fn record_success(&mut self, backend: &str, model: &str, key_name: &str) {
        self.attempts.push(Attempt {
            backend: backend.to_string(),
            model: model.to_string(),
            key_name: key_name.to_string(),
            outcome: AttemptOutcome::Success,
        });
    }
}

/// All attempts in a route's sequence were exhausted without success.
#[derive(Debug)]
pub struct AllAttemptsFailed {
    pub log: AttemptLog,
}

impl std::fmt::Display for AllAttemptsFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all {} attempts failed", self.log.attempts.len())
    }
}

impl std::error::Error for AllAttemptsFailed {}
