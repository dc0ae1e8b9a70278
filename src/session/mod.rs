//! Session store: a single in-memory map from session id to `Session`,
//! striped per-session locking so read-modify-write never takes a
//! global lock on the hot path.
//!
//! No direct teacher analogue (the teacher is stateless per-call); the
//! striped-map shape is grounded on the `dashmap` usage pattern seen
//! across the `loom`/`skynet-agent` examples for shared concurrent
//! state.

pub mod commands;
pub mod state;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::canonical::Message;
use crate::pipeline::tool_loop::ToolCallFingerprint;
use state::SessionState;

const DEFAULT_HISTORY_CAPACITY: usize = 200;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub created_unix: i64,
    pub last_touched_unix: i64,
    pub history: VecDeque<Message>,
    /// Persistent ring buffer of recent tool invocations, used by
    /// `pipeline::tool_loop` to detect repeats across requests within
    /// this session.
    pub tool_call_fingerprints: VecDeque<ToolCallFingerprint>,
}

impl Session {
    fn new(id: String, command_prefix: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id,
            state: SessionState::new(command_prefix),
            created_unix: now,
            last_touched_unix: now,
            history: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
            tool_call_fingerprints: VecDeque::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_touched_unix = Utc::now().timestamp();
    }

    pub fn push_history(&mut self, message: Message) {
        if self.history.len() >= DEFAULT_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }
}

/// Striped session map: one `tokio::sync::Mutex` per session, so
/// concurrent requests against *different* sessions never contend, and
/// a single session's command mutations are totally ordered with
/// respect to its own dispatch, per the concurrency model.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<Mutex<Session>>>>,
    default_command_prefix: String,
}

impl SessionStore {
    pub fn new(default_command_prefix: impl Into<String>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            default_command_prefix: default_command_prefix.into(),
        }
    }

    /// Get or create the session handle for `id`. The returned `Arc`
    /// must be locked by the caller before reading/mutating.
    pub fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Session::new(id.to_string(), &self.default_command_prefix)))
            })
            .clone()
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot every session's state for the optional on-disk snapshot
    /// file. History is included only when `with_history` is set
    /// (`session.persist_history`), matching the default-off behavior
    /// decided in the open questions.
    pub async fn snapshot(&self, with_history: bool) -> Vec<SessionSnapshot> {
        let mut out = Vec::with_capacity(self.sessions.len());
        for entry in self.sessions.iter() {
            let session = entry.value().lock().await;
            out.push(SessionSnapshot {
                id: session.id.clone(),
                state: session.state.clone(),
                history: if with_history {
                    Some(session.history.iter().cloned().collect())
                } else {
                    None
                },
            });
        }
        out
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    pub history: Option<Vec<Message>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_independent_by_id() {
        let store = SessionStore::new("!/");
        let a = store.get_or_create("a");
        let b = store.get_or_create("b");
        {
            let mut a = a.lock().await;
            a.state.project = Some("proj-a".into());
        }
        let b = b.lock().await;
        assert!(b.state.project.is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn same_id_returns_same_handle() {
        let store = SessionStore::new("!/");
        let a1 = store.get_or_create("x");
        {
            let mut a1 = a1.lock().await;
            a1.state.project = Some("proj-x".into());
        }
        let a2 = store.get_or_create("x");
        let a2 = a2.lock().await;
        assert_eq!(a2.state.project.as_deref(), Some("proj-x"));
    }
}
