//! Response pipeline: middleware applied to a dispatched response
//! before it's translated back into the client's wire dialect.
//!
//! Order matters: content loop detection runs first so a looping
//! response never reaches JSON repair or usage accounting with
//! unbounded repeated text; tool-call loop detection and JSON repair
//! operate per tool call rather than per response/stream, so the HTTP
//! layer invokes them directly against the session's fingerprint
//! history and the configured schema table instead of going through a
//! blanket response pass here.

pub mod content_loop;
pub mod json_repair;
pub mod tool_loop;
pub mod usage;

pub use content_loop::ContentLoopDetector;
pub use json_repair::{JsonRepairer, RepairOutcome, StreamJsonBuffer};
pub use tool_loop::{ToolCallFingerprint, ToolLoopAction, ToolLoopDetector};
pub use usage::{finalize_response_usage, usage_headers, UsageAccumulator};

use futures::StreamExt;

use crate::backend::BackendStream;
use crate::canonical::{CanonicalChatResponse, FinishReason};
use crate::session::state::LoopDetectionState;

/// Non-streaming pipeline: content loop detection, then usage
/// accounting.
pub fn apply_response_pipeline(loop_config: &LoopDetectionState, response: CanonicalChatResponse) -> CanonicalChatResponse {
    let response = content_loop::apply_response(loop_config, response);
    finalize_response_usage(response)
}

/// Wraps a backend stream with content loop detection. Each chunk's
/// text delta is fed through a fresh detector; the moment a loop is
/// found, that chunk's delta is truncated, its `finish_reason` is set
/// to `ContentFilter`, and the stream ends there without forwarding
/// whatever the backend sends afterward.
pub fn wrap_stream_with_content_loop_detection(loop_config: LoopDetectionState, stream: BackendStream) -> BackendStream {
    let mut detector = ContentLoopDetector::new(&loop_config);
    let out = async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Err(err) => {
                    yield Err(err);
                    break;
                }
                Ok(mut chunk) => {
                    let mut should_stop = false;
                    for choice in &mut chunk.choices {
                        let Some(content) = choice.delta.content.clone() else { continue };
                        let (allowed, triggered) = detector.feed(&content);
                        choice.delta.content = Some(allowed);
                        if triggered {
                            choice.finish_reason = Some(FinishReason::ContentFilter);
                            should_stop = true;
                        }
                    }
                    yield Ok(chunk);
                    if should_stop {
                        break;
                    }
                }
            }
        }
    };
    Box::pin(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{ChoiceDelta, Delta, StreamChunk};
    use crate::error::ProxyError;

    fn config() -> LoopDetectionState {
        LoopDetectionState {
            enabled: true,
            min_pattern_len: 3,
            max_pattern_len: 64,
            min_repetitions: 3,
        }
    }

    fn chunk(content: &str) -> Result<StreamChunk, ProxyError> {
        Ok(StreamChunk {
            id: "s1".into(),
            created_unix: 0,
            model: "m".into(),
            choices: vec![ChoiceDelta {
                index: 0,
                delta: Delta {
                    content: Some(content.to_string()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        })
    }

    #[tokio::test]
    async fn stream_terminates_early_once_a_loop_is_detected() {
        let source = futures::stream::iter(vec![chunk("abcabc"), chunk("abcxyz"), chunk("never reached")]);
        let stream: BackendStream = Box::pin(source);
        let wrapped = wrap_stream_with_content_loop_detection(config(), stream);
        let results: Vec<_> = wrapped.collect().await;
        assert_eq!(results.len(), 2);
        let last = results.last().unwrap().as_ref().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::ContentFilter));
    }

    #[tokio::test]
    async fn non_looping_stream_passes_through_untouched() {
        let source = futures::stream::iter(vec![chunk("hello "), chunk("world")]);
        let stream: BackendStream = Box::pin(source);
        let wrapped = wrap_stream_with_content_loop_detection(config(), stream);
        let results: Vec<_> = wrapped.collect().await;
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(r.as_ref().unwrap().choices[0].finish_reason.is_none());
        }
    }
}
