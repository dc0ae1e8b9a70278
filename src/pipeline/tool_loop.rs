//! Tool-call loop detector: tracks repeated tool invocations within a
//! session and decides whether to let a repeat through, warn, or block.
//!
//! Grounded directly on the teacher's `llm::loop_detector::LoopDetector`
//! (same ring-buffer-of-calls shape, `check`/`record_call`), generalized
//! with TTL-based expiry (the teacher has none), a normalized
//! Levenshtein-ratio similarity in place of the teacher's exact
//! `serde_json::Value` equality, and `block`/`warn`/`chance_then_block`
//! modes replacing the teacher's three-strikes escalation ladder.

use std::collections::VecDeque;

use serde_json::Value;

use crate::config::ToolLoopMode;
use crate::session::state::ToolLoopDetectionState;

const MAX_TRACKED: usize = 128;

/// One recorded tool invocation. `normalized_args` is kept (not just a
/// hash) because similarity scoring needs the actual string.
#[derive(Debug, Clone)]
pub struct ToolCallFingerprint {
    pub tool_name: String,
    pub normalized_args: String,
    pub normalized_args_hash: u64,
    pub timestamp_unix: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolLoopAction {
    Pass,
    Warn { message: String },
    InjectGuidance { message: String },
    Block { message: String },
}

pub struct ToolLoopDetector {
    config: ToolLoopDetectionState,
}

impl ToolLoopDetector {
    pub fn new(config: ToolLoopDetectionState) -> Self {
        Self { config }
    }

    /// Normalize a tool call's arguments: `serde_json`'s default map
    /// representation already sorts object keys and serializes without
    /// incidental whitespace, so this is just a compact re-render.
    pub fn canonicalize_args(args: &Value) -> String {
        serde_json::to_string(args).unwrap_or_default()
    }

    /// Record `tool_name`/`args` against `history` (the session's
    /// persistent ring buffer, owned by the caller) and decide what to
    /// do about it. Expired entries (older than the TTL) are pruned
    /// first; the new call is always recorded afterward, regardless of
    /// the action taken.
    pub fn record_and_check(
        &self,
        history: &mut VecDeque<ToolCallFingerprint>,
        tool_name: &str,
        args: &Value,
        now_unix: i64,
    ) -> ToolLoopAction {
        if !self.config.enabled {
            return ToolLoopAction::Pass;
        }

        let ttl = self.config.ttl_seconds as i64;
        history.retain(|fp| now_unix - fp.timestamp_unix <= ttl);

        let normalized = Self::canonicalize_args(args);
        let similar_count = history
            .iter()
            .filter(|fp| {
                fp.tool_name == tool_name
                    && similarity_ratio(&fp.normalized_args, &normalized) >= self.config.similarity_threshold
            })
            .count();

        // Including the call being recorded right now.
        let total = similar_count + 1;

        while history.len() >= MAX_TRACKED {
            history.pop_front();
        }
        history.push_back(ToolCallFingerprint {
            tool_name: tool_name.to_string(),
            normalized_args_hash: hash_str(&normalized),
            normalized_args: normalized,
            timestamp_unix: now_unix,
        });

        if total < self.config.max_repeats {
            return ToolLoopAction::Pass;
        }

        let trip = total - self.config.max_repeats + 1;

        match self.config.mode {
            ToolLoopMode::Block => ToolLoopAction::Block {
                message: format!(
                    "tool `{tool_name}` has been called {total} times with near-identical arguments; blocking further calls"
                ),
            },
            ToolLoopMode::Warn => ToolLoopAction::Warn {
                message: format!(
                    "tool `{tool_name}` has been called {total} times with near-identical arguments"
                ),
            },
            ToolLoopMode::ChanceThenBlock => {
                if trip <= 1 {
                    ToolLoopAction::InjectGuidance {
                        message: format!(
                            "tool `{tool_name}` has been called {total} times with near-identical arguments. \
                             Try a different approach before calling it again."
                        ),
                    }
                } else {
                    ToolLoopAction::Block {
                        message: format!(
                            "tool `{tool_name}` repeated the same arguments again after a warning; blocking further calls"
                        ),
                    }
                }
            }
        }
    }
}

fn hash_str(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// 1.0 for identical strings, 0.0 for maximally different ones of the
/// same length. Two empty strings are identical by convention.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(a, b) as f64 / max_len as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(mode: ToolLoopMode) -> ToolLoopDetectionState {
        ToolLoopDetectionState {
            enabled: true,
            max_repeats: 3,
            ttl_seconds: 60,
            mode,
            similarity_threshold: 0.92,
        }
    }

    #[test]
    fn exact_repeats_below_threshold_pass() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::Block));
        let mut history = VecDeque::new();
        let args = json!({"command": "ls"});
        for _ in 0..2 {
            let action = detector.record_and_check(&mut history, "bash", &args, 1000);
            assert_eq!(action, ToolLoopAction::Pass);
        }
    }

    #[test]
    fn block_mode_blocks_on_reaching_max_repeats() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::Block));
        let mut history = VecDeque::new();
        let args = json!({"command": "ls"});
        detector.record_and_check(&mut history, "bash", &args, 1000);
        detector.record_and_check(&mut history, "bash", &args, 1001);
        let action = detector.record_and_check(&mut history, "bash", &args, 1002);
        assert!(matches!(action, ToolLoopAction::Block { .. }));
    }

    #[test]
    fn chance_then_block_warns_once_then_blocks() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::ChanceThenBlock));
        let mut history = VecDeque::new();
        let args = json!({"command": "ls"});
        detector.record_and_check(&mut history, "bash", &args, 1000);
        detector.record_and_check(&mut history, "bash", &args, 1001);
        let first_trip = detector.record_and_check(&mut history, "bash", &args, 1002);
        assert!(matches!(first_trip, ToolLoopAction::InjectGuidance { .. }));
        let second_trip = detector.record_and_check(&mut history, "bash", &args, 1003);
        assert!(matches!(second_trip, ToolLoopAction::Block { .. }));
    }

    #[test]
    fn warn_mode_never_blocks() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::Warn));
        let mut history = VecDeque::new();
        let args = json!({"command": "ls"});
        for i in 0..6 {
            let action = detector.record_and_check(&mut history, "bash", &args, 1000 + i);
            if i >= 2 {
                assert!(matches!(action, ToolLoopAction::Warn { .. }));
            }
        }
    }

    #[test]
    fn expired_entries_do_not_count_toward_the_threshold() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::Block));
        let mut history = VecDeque::new();
        let args = json!({"command": "ls"});
        detector.record_and_check(&mut history, "bash", &args, 1000);
        detector.record_and_check(&mut history, "bash", &args, 1001);
        // Far beyond the 60s TTL: earlier calls have expired.
        let action = detector.record_and_check(&mut history, "bash", &args, 2000);
        assert_eq!(action, ToolLoopAction::Pass);
    }

    #[test]
    fn dissimilar_arguments_do_not_count_as_repeats() {
        let detector = ToolLoopDetector::new(config(ToolLoopMode::Block));
        let mut history = VecDeque::new();
        detector.record_and_check(&mut history, "bash", &json!({"command": "ls -la /tmp"}), 1000);
        detector.record_and_check(&mut history, "bash", &json!({"command": "cat README.md"}), 1001);
        let action = detector.record_and_check(&mut history, "bash", &json!({"command": "pwd"}), 1002);
        assert_eq!(action, ToolLoopAction::Pass);
    }

    #[test]
    fn similarity_ratio_of_identical_strings_is_one() {
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
    }

    #[test]
    fn similarity_ratio_of_empty_strings_is_one() {
        assert_eq!(similarity_ratio("", ""), 1.0);
    }
}
