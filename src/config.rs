//! Layered configuration: defaults -> YAML/JSON file -> process
//! environment, env wins. Flat key surface per the config surface spec.
//!
//! Grounded on the `figment`-based env+file layering used by the
//! `skynet-core` example; the teacher has no config layer at all (it
//! only had `clap` CLI args for an unrelated file-discovery tool).

use std::collections::HashMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Json, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window_seconds: u64,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "backend_key".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window_seconds: 60,
            scope: default_scope(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    pub enabled: bool,
    pub min_pattern_length: usize,
    pub max_pattern_length: usize,
    pub min_repetitions: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pattern_length: 3,
            max_pattern_length: 64,
            min_repetitions: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolLoopMode {
    Block,
    Warn,
    ChanceThenBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallLoopConfig {
    pub enabled: bool,
    pub max_repeats: usize,
    pub ttl_seconds: u64,
    pub mode: ToolLoopMode,
    pub similarity_threshold: f64,
}

impl Default for ToolCallLoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_repeats: 3,
            ttl_seconds: 60,
            mode: ToolLoopMode::ChanceThenBlock,
            similarity_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonRepairConfig {
    pub enabled: bool,
    pub strict_mode: bool,
    pub buffer_cap_bytes: usize,
    pub coercion_enabled: bool,
    #[serde(default)]
    pub schemas: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendKeyConfig {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub api_url: String,
    pub api_keys: Vec<BackendKeyConfig>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub oauth_credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutePolicy {
    K,
    M,
    Km,
    Mk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteElement {
    pub backend: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRouteConfig {
    pub policy: RoutePolicy,
    pub elements: Vec<RouteElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub default_backend: Option<String>,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_timeout")]
    pub proxy_timeout_seconds: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,
    #[serde(default)]
    pub tool_call_loop: ToolCallLoopConfig,
    #[serde(default)]
    pub json_repair: JsonRepairConfig,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub failover_routes: HashMap<String, FailoverRouteConfig>,
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
    #[serde(default)]
    pub client_api_keys: Vec<String>,
    #[serde(default)]
    pub session_snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub session_persist_history: bool,
    #[serde(default)]
    pub wire_capture_log_path: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_prefix() -> String {
    "!/".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_auth_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load configuration: built-in defaults, then an optional file
    /// (YAML or JSON, chosen by extension), then process env (uppercase
    /// keys, `.` replaced by `_`), env wins per the config surface spec.
    pub fn load(file_path: Option<&PathBuf>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new();

        if let Some(path) = file_path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Yaml::file(path)),
            };
        }

        figment = figment.merge(Env::raw().map(|k| k.as_str().replace('.', "_").into()));

        figment.extract()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_backend: None,
            command_prefix: default_prefix(),
            proxy_timeout_seconds: default_timeout(),
            rate_limit: RateLimitConfig::default(),
            loop_detection: LoopDetectionConfig::default(),
            tool_call_loop: ToolCallLoopConfig::default(),
            json_repair: JsonRepairConfig::default(),
            backends: HashMap::new(),
            failover_routes: HashMap::new(),
            auth_enabled: true,
            client_api_keys: Vec::new(),
            session_snapshot_path: None,
            session_persist_history: false,
            wire_capture_log_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ports() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.command_prefix, "!/");
    }

    #[test]
    fn mk_is_not_k() {
        assert_ne!(RoutePolicy::Mk, RoutePolicy::K);
    }
}
