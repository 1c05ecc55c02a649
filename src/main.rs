//! Chatty - real-time chat backend
//!
//! Entry point for the Chatty server.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use tracing::error;

mod api;
mod middleware;
mod server;
mod telemetry;
mod websocket;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = server::load_config().context("Failed to load configuration")?;
    telemetry::init(&config);

    if let Err(e) = server::run(config).await {
        error!(error = ?e, "Server exited with error");
        return Err(e);
    }
    Ok(())
}
