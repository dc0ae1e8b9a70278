//! Structured logging and the wire-capture audit log.
//!
//! Replaces the teacher's hand-rolled `SimpleLogger` (a `Mutex`-guarded
//! `VecDeque` flushed to `app.log`) with `tracing`/`tracing-subscriber`,
//! the idiomatic choice for a production HTTP service across the
//! example corpus. The wire-capture log keeps the teacher's habit of a
//! single append target but is modeled on `erans-lunaroute`'s
//! `SessionEvent` tagged-enum shape.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireDirection {
    OutboundRequest,
    InboundResponse,
    StreamStart,
    StreamChunk,
    StreamEnd,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireCaptureEntry {
    pub timestamp_iso: String,
    pub direction: WireDirection,
    pub backend: String,
    pub model: String,
    pub session_id: String,
    pub content_length: usize,
    pub payload: serde_json::Value,
}

impl WireCaptureEntry {
    pub fn new(
        direction: WireDirection,
        backend: impl Into<String>,
        model: impl Into<String>,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let content_length = payload.to_string().len();
        Self {
            timestamp_iso: Utc::now().to_rfc3339(),
            direction,
            backend: backend.into(),
            model: model.into(),
            session_id: session_id.into(),
            content_length,
            payload,
        }
    }
}

/// Append-only JSON-Lines writer for the wire-capture audit log.
pub struct WireCaptureLog {
    path: Option<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl WireCaptureLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn record(&self, entry: &WireCaptureEntry) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.lock.lock().await;
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize wire capture entry");
                return;
            }
        };
        let file = OpenOptions::new().create(true).append(true).open(path).await;
        match file {
            Ok(mut f) => {
                if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                    tracing::warn!(error = %e, "failed to append wire capture entry");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to open wire capture log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_log_is_a_no_op() {
        let log = WireCaptureLog::disabled();
        let entry = WireCaptureEntry::new(
            WireDirection::OutboundRequest,
            "openai",
            "gpt-4",
            "sess-1",
            serde_json::json!({"hello": "world"}),
        );
        log.record(&entry).await;
    }

    #[tokio::test]
    async fn writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.jsonl");
        let log = WireCaptureLog::new(Some(path.clone()));
        let entry = WireCaptureEntry::new(
            WireDirection::StreamChunk,
            "anthropic",
            "claude",
            "sess-2",
            serde_json::json!({"delta": "hi"}),
        );
        log.record(&entry).await;
        log.record(&entry).await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
