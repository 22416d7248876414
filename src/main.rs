use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parlor::config::AppConfig;
use parlor::database::ChatDatabase;
use parlor::llm_client::CompletionClient;
use parlor::server::serve;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor=debug")),
        )
        .init();

    let config = AppConfig::load();

    let db = Arc::new(
        ChatDatabase::new(&config.database_path).context("failed to open chat database")?,
    );
    let completions = Arc::new(CompletionClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
        Duration::from_secs(config.completion_timeout_secs),
    )?);

    tracing::info!(
        "Starting group chat backend (set PARLOR_TOKEN + optional PARLOR_BIND; auth mode via PARLOR_AUTH_MODE)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve(db, completions, config))
}
