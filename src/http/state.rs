//! Shared application state handed to every axum handler.
//!
//! Grounded on the teacher's habit of building its provider/registry
//! graph once in `main` and threading it through; generalized here into
//! one `Clone`-cheap `AppState` (everything behind an `Arc`) since axum
//! extracts state by value per request.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::credentials::CredentialManager;
use crate::dispatch::Dispatcher;
use crate::pipeline::JsonRepairer;
use crate::session::commands::CommandEngine;
use crate::session::SessionStore;
use crate::telemetry::WireCaptureLog;

struct Inner {
    config: AppConfig,
    dispatcher: Dispatcher,
    sessions: SessionStore,
    commands: CommandEngine,
    credentials: CredentialManager,
    wire_capture: Arc<WireCaptureLog>,
    json_repairer: JsonRepairer,
}

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    pub fn new(
        config: AppConfig,
        dispatcher: Dispatcher,
        credentials: CredentialManager,
        wire_capture: Arc<WireCaptureLog>,
    ) -> Self {
        let sessions = SessionStore::new(config.command_prefix.clone());
        let json_repairer = JsonRepairer::new(config.json_repair.clone());
        Self(Arc::new(Inner {
            config,
            dispatcher,
            sessions,
            commands: CommandEngine::with_builtins(),
            credentials,
            wire_capture,
            json_repairer,
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.0.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.0.dispatcher
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.0.sessions
    }

    pub fn commands(&self) -> &CommandEngine {
        &self.0.commands
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.0.credentials
    }

    pub fn wire_capture(&self) -> &Arc<WireCaptureLog> {
        &self.0.wire_capture
    }

    pub fn json_repairer(&self) -> &JsonRepairer {
        &self.0.json_repairer
    }
}
