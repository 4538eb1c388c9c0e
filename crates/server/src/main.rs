//! recall-mcp: serves the cache tools over stdio.
//!
//! stdout carries JSON-RPC, so logs are JSON lines on stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use recall_core::{AppConfig, open_stores};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod state;
mod tools;

/// How long queued background jobs get to finish after the client disconnects.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let stores = open_stores(&config).await?;
    let state = Arc::new(state::AppState::new(config, &stores)?);

    tracing::info!(producers = ?state.producer_names(), "Starting recall server on stdio transport");

    let handler = handler::RecallServer::new(state.clone());
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    state.coord.pool.shutdown(SHUTDOWN_GRACE).await;

    Ok(())
}
