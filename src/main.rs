use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llm_proxy::config::AppConfig;
use llm_proxy::credentials::CredentialManager;
use llm_proxy::dispatch::{build_registry, Dispatcher};
use llm_proxy::http::{self, AppState};
use llm_proxy::telemetry::{self, WireCaptureLog};

#[derive(Parser)]
#[command(name = "llm-proxy")]
#[command(author, version, about = "Intercepting HTTP proxy for LLM APIs", long_about = None)]
struct Cli {
    /// Path to a YAML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_ref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let credentials = CredentialManager::startup(&config).map_err(|err| {
        tracing::error!(error = %err, "no functional backend credential at startup");
        err
    })?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.proxy_timeout_seconds))
        .build()?;
    let registry = build_registry(client, &config.backends);
    let wire_capture = Arc::new(WireCaptureLog::new(config.wire_capture_log_path.clone()));
    let dispatcher = Dispatcher::new(registry, Arc::new(credentials.clone()), &config.rate_limit, wire_capture.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, dispatcher, credentials, wire_capture);
    let router = http::router(state);

    tracing::info!(%addr, "starting llm-proxy");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
