//! Immutable `SessionState` and friends.
//!
//! `SessionState` is never mutated in place; a command mutation produces
//! a new value which replaces the old one under the session's lock. No
//! shared mutable graphs, per the design notes on avoiding cyclic
//! structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{RoutePolicy, ToolLoopMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRoute {
    pub name: String,
    pub policy: RoutePolicy,
    pub elements: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneoffRoute {
    pub backend: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReasoningConfig {
    pub effort: Option<crate::canonical::ReasoningEffort>,
    pub thinking_budget: Option<i64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub prompt_prefix: Option<String>,
    pub prompt_suffix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionState {
    pub enabled: bool,
    pub min_pattern_len: usize,
    pub max_pattern_len: usize,
    pub min_repetitions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopDetectionState {
    pub enabled: bool,
    pub max_repeats: usize,
    pub ttl_seconds: u64,
    pub mode: ToolLoopMode,
    pub similarity_threshold: f64,
}

/// Immutable per-session state. Mutation (via a command) produces a new
/// value; the old one is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub backend_override: Option<String>,
    pub model_override: Option<String>,
    pub project: Option<String>,
    pub interactive_mode: bool,
    pub command_prefix: String,
    pub failover_routes: HashMap<String, FailoverRoute>,
    pub reasoning: ReasoningConfig,
    pub loop_detection: LoopDetectionState,
    pub tool_loop_detection: ToolLoopDetectionState,
    pub oneoff_route: Option<OneoffRoute>,
}

impl SessionState {
    pub fn new(default_prefix: impl Into<String>) -> Self {
        Self {
            backend_override: None,
            model_override: None,
            project: None,
            interactive_mode: false,
            command_prefix: default_prefix.into(),
            failover_routes: HashMap::new(),
            reasoning: ReasoningConfig::default(),
            loop_detection: LoopDetectionState {
                enabled: true,
                min_pattern_len: 3,
                max_pattern_len: 64,
                min_repetitions: 3,
            },
            tool_loop_detection: ToolLoopDetectionState {
                enabled: true,
                max_repeats: 3,
                ttl_seconds: 60,
                mode: ToolLoopMode::ChanceThenBlock,
                similarity_threshold: 0.92,
            },
            oneoff_route: None,
        }
    }

    /// Consume the one-off route, if any, clearing it in the returned
    /// state (the caller is responsible for committing the returned
    /// state back to the store).
    pub fn take_oneoff_route(&self) -> (Option<OneoffRoute>, SessionState) {
        let mut next = self.clone();
        let taken = next.oneoff_route.take();
        (taken, next)
    }
}
