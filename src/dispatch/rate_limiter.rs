//! Token-bucket rate limiter, one bucket per scope key. In-memory only;
//! buckets reset on process restart per the rate limiter spec.
//!
//! Grounded on the `dashmap`-backed concurrent-map pattern used across
//! the example pack's server-shaped repos for shared hot-path state
//! (the teacher, a single-process CLI tool, never needed one).

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    limit: u64,
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_seconds.max(1)),
            buckets: DashMap::new(),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.limit as f64 / self.window.as_secs_f64()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Tokens currently available for `scope`, without consuming one.
    /// Used to populate `x-ratelimit-remaining` after a successful
    /// attempt; does not refill on behalf of a scope that has never
    /// been acquired (reports the full limit).
    pub fn remaining(&self, scope: &str) -> u64 {
        match self.buckets.get(scope) {
            Some(bucket) => {
                let elapsed = Instant::now().duration_since(bucket.last_refill).as_secs_f64();
                ((bucket.tokens + elapsed * self.refill_rate()).min(self.limit as f64)).floor() as u64
            }
            None => self.limit,
        }
    }

    /// Attempt to consume one token for `scope`. Returns `Ok(())` if
    /// allowed, `Err(retry_after_seconds)` if denied.
    pub fn try_acquire(&self, scope: &str) -> Result<(), u64> {
        let mut bucket = self.buckets.entry(scope.to_string()).or_insert_with(|| Bucket {
            tokens: self.limit as f64,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate()).min(self.limit as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_seconds = (deficit / self.refill_rate()).ceil() as u64;
            Err(wait_seconds.max(1))
        }
    }
}

/// Scope key builder, matching the config's `scope` setting
/// (`backend_key` default, or `client_api_key`).
pub fn scope_key(scope_kind: &str, backend: &str, key_name: &str, client_api_key: Option<&str>) -> String {
    match scope_kind {
        "client_api_key" => format!("client:{}", client_api_key.unwrap_or("anonymous")),
        _ => format!("backend_key:{backend}:{key_name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_after_limit_exhausted() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.try_acquire("scope-a").is_ok());
        assert!(limiter.try_acquire("scope-a").is_ok());
        assert!(limiter.try_acquire("scope-a").is_err());
    }

    #[test]
    fn scopes_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.try_acquire("scope-a").is_ok());
        assert!(limiter.try_acquire("scope-b").is_ok());
    }

    #[test]
    fn scope_key_defaults_to_backend_key() {
        assert_eq!(scope_key("backend_key", "openai", "k1", None), "backend_key:openai:k1");
        assert_eq!(scope_key("client_api_key", "openai", "k1", Some("sk-abc")), "client:sk-abc");
    }
}
