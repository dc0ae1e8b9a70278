//! Shared SSE idle-timeout plumbing for every connector.
//!
//! Grounded in the `aiproxy` example's `sse/streaming.rs`
//! (`stream_openai_chat`/`stream_anthropic`/`stream_gemini`), which each
//! wrapped `byte_stream.next()` in `timeout(IDLE_TIMEOUT, ...)`. Here
//! that loop is factored into one generic helper so every connector
//! shares it instead of hand-rolling its own.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::ProxyError;

/// One decoded `data: ...` payload from an upstream event stream, or the
/// terminal `[DONE]` sentinel (OpenAI/OpenAI-compatible dialects only;
/// Anthropic and Gemini terminate on stream close instead).
#[derive(Debug)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Pull one SSE frame at a time out of a raw byte stream, applying an
/// idle timeout to each underlying poll so a backend that stops sending
/// bytes mid-stream (rather than closing the connection) doesn't hang
/// the request forever.
///
/// `event_prefix` strips everything up to and including `data: ` per
/// line (blank lines and `event: ...` lines are ignored, matching every
/// provider's SSE framing in the teacher's per-provider stream parsers).
pub fn sse_events(
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    idle_timeout: Duration,
    backend: &'static str,
) -> Pin<Box<dyn Stream<Item = Result<SseEvent, ProxyError>> + Send>> {
    Box::pin(async_stream::stream! {
        let mut byte_stream = byte_stream;
        let mut buffer = String::new();

        loop {
            let next = tokio::time::timeout(idle_timeout, byte_stream.next()).await;
            let chunk = match next {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(err))) => {
                    yield Err(ProxyError::UpstreamTransient {
                        backend: backend.to_string(),
                        message: err.to_string(),
                        retry_after: None,
                    });
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(ProxyError::Timeout {
                        scope: format!("{backend}_idle_stream"),
                    });
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);

                if line.is_empty() {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    yield Ok(SseEvent::Done);
                    continue;
                }
                yield Ok(SseEvent::Data(data.to_string()));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_data_then_done() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> =
            Box::pin(futures::stream::iter(chunks));
        let mut events = sse_events(stream, Duration::from_secs(5), "test");

        match events.next().await {
            Some(Ok(SseEvent::Data(d))) => assert_eq!(d, "{\"a\":1}"),
            other => panic!("unexpected: {other:?}"),
        }
        match events.next().await {
            Some(Ok(SseEvent::Done)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(events.next().await.is_none());
    }
}
