//! Usage accounting: folds whatever usage numbers a backend reports
//! into the canonical response, and exposes them as response headers
//! for callers that don't parse the body.

use crate::canonical::{CanonicalChatResponse, CanonicalUsage};

/// Ensures `total_tokens` is populated even when a connector only fills
/// in prompt/completion counts.
pub fn finalize_response_usage(mut response: CanonicalChatResponse) -> CanonicalChatResponse {
    if response.usage.total_tokens == 0 {
        response.usage.total_tokens = response.usage.total();
    }
    response
}

pub fn usage_headers(usage: &CanonicalUsage) -> Vec<(&'static str, String)> {
    vec![
        ("x-usage-prompt-tokens", usage.prompt_tokens.to_string()),
        ("x-usage-completion-tokens", usage.completion_tokens.to_string()),
        ("x-usage-total-tokens", usage.total_tokens.to_string()),
    ]
}

/// Accumulates usage across a stream's chunks. Most dialects only
/// attach usage to the final chunk, so later observations simply
/// replace earlier ones; `Gemini` sends a running total on every chunk,
/// which this also handles correctly since a running total is exactly
/// what we want to end up holding.
#[derive(Debug, Default, Clone)]
pub struct UsageAccumulator {
    totals: CanonicalUsage,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, usage: Option<&CanonicalUsage>) {
        if let Some(usage) = usage {
            self.totals = usage.clone();
        }
    }

    pub fn into_usage(self) -> CanonicalUsage {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Choice, FinishReason, Message};

    #[test]
    fn fills_total_tokens_when_backend_omits_it() {
        let response = CanonicalChatResponse {
            id: "r1".into(),
            created_unix: 0,
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("hi"),
                finish_reason: FinishReason::Stop,
            }],
            usage: CanonicalUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 0,
            },
        };
        let response = finalize_response_usage(response);
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn accumulator_keeps_the_latest_observation() {
        let mut acc = UsageAccumulator::new();
        acc.observe(Some(&CanonicalUsage {
            prompt_tokens: 10,
            completion_tokens: 1,
            total_tokens: 11,
        }));
        acc.observe(Some(&CanonicalUsage {
            prompt_tokens: 10,
            completion_tokens: 4,
            total_tokens: 14,
        }));
        acc.observe(None);
        assert_eq!(acc.into_usage().total_tokens, 14);
    }
}
