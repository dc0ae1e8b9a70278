//! Translation service: bidirectional mapping between the canonical
//! model and each wire dialect.
//!
//! Wire struct shapes are carried over from the teacher's
//! `llm::openai`/`llm::anthropic`/`llm::gemini` modules (which built an
//! HTTP request body and parsed that same provider's SSE), retargeted
//! here to pure `to_canonical`/`from_canonical` mapping functions; the
//! HTTP call itself now lives in `backend::*`.

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// Parameter mapping rule outcome for fields a dialect cannot express.
#[derive(Debug, Clone)]
pub enum MappingOutcome<T> {
    Mapped(T),
    Dropped { field: &'static str },
}

/// `reasoning_effort -> thinkingConfig.thinkingBudget` per the table
/// `{low: 512, medium: 2048, high: -1}`; OpenAI passes `reasoning_effort`
/// straight through; Anthropic drops it.
pub fn gemini_thinking_budget(effort: crate::canonical::ReasoningEffort) -> i64 {
    effort.gemini_thinking_budget()
}
