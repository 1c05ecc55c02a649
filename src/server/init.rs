//! Server initialization and main run loop
//!
//! Startup order is fixed: storage, HTTP middleware, broadcast bridge,
//! router, listener. Any failure before the listener is bound aborts startup.

use super::config::{AppConfig, BackplaneKind};
use super::router::build_router;
use super::state::AppState;
use super::validation::warn_production_config;
use crate::middleware::HttpMiddleware;
use anyhow::{Context, Result};
use chatty_core::{
    shutdown_signal_with_controller, Backplane, BackplaneError, BridgeError, BroadcastBridge,
    ConnectionRegistry, MemoryBackplane, RedisBackplane, ShutdownController, SqlStorage,
    StorageError, StorageSupervisor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Time allowed for background tasks to stop after the listener closes
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures that abort startup
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Storage(#[from] StorageError),

    #[error("backplane client could not be created: {0}")]
    Backplane(#[from] BackplaneError),

    #[error("broadcast bridge initialization failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("client origin '{0}' cannot be used for CORS")]
    InvalidOrigin(String),
}

/// Run the server until a shutdown signal arrives
pub async fn run(config: AppConfig) -> Result<()> {
    info!(
        environment = %config.environment,
        "Starting Chatty v{}",
        env!("CARGO_PKG_VERSION")
    );
    warn_production_config(&config);

    let config = Arc::new(config);
    let shutdown =
        ShutdownController::with_timeout(Duration::from_secs(config.server.shutdown_timeout_secs));

    // 1. Persistent storage
    let storage = connect_storage(&config).await?;
    let storage_monitor = storage.spawn_monitor(shutdown.token());

    // 2. HTTP middleware
    let middleware = HttpMiddleware::new(&config).map_err(StartupError::InvalidOrigin)?;
    info!(
        client_url = %config.server.client_url,
        secure_cookies = config.secure_cookies(),
        session_max_age_hours = config.session.max_age_hours,
        "HTTP middleware configured"
    );

    // 3. Broadcast bridge, fanning out into the registry
    let registry = Arc::new(ConnectionRegistry::new());
    let bridge = init_bridge(&config).await?;
    let fanout = Arc::clone(&registry);
    bridge.on_event(move |event| {
        fanout.fan_out(&event);
    });

    // 4. Routes, then the not-found and error handlers
    let state = AppState {
        config: Arc::clone(&config),
        registry,
        bridge: bridge.clone(),
        storage: Arc::clone(&storage),
        shutdown: Arc::clone(&shutdown),
    };
    let app = build_router(state, &middleware);

    // 5. Listen
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(pid = std::process::id(), "Server has started with process {}", std::process::id());
    info!(port = config.server.port, "Server running on port {}", config.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_controller(Arc::clone(&shutdown)))
        .await
        .context("HTTP server error")?;

    bridge.shutdown().await;
    if tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, storage_monitor)
        .await
        .is_err()
    {
        warn!("Storage monitor did not stop in time");
    }
    storage.disconnect().await;

    info!("Chatty shutdown complete");
    Ok(())
}

async fn connect_storage(config: &AppConfig) -> Result<Arc<StorageSupervisor>, StartupError> {
    let storage = SqlStorage::new(config.database.url.clone(), config.database.storage_options());
    info!(database = ?storage, "Connecting to database");

    let supervisor = Arc::new(StorageSupervisor::new(
        Arc::new(storage),
        config.reconnect.policy(),
        config.database.health_check_interval(),
    ));
    supervisor.connect().await?;
    Ok(supervisor)
}

async fn init_bridge(config: &AppConfig) -> Result<BroadcastBridge, StartupError> {
    let (publisher, subscriber) = backplanes(config)?;
    let bridge = BroadcastBridge::initialize(publisher, subscriber, config.bridge_config()).await?;
    Ok(bridge)
}

/// Publisher and subscriber backplanes for the configured kind
fn backplanes(
    config: &AppConfig,
) -> Result<(Arc<dyn Backplane>, Arc<dyn Backplane>), BackplaneError> {
    match config.backplane.kind {
        BackplaneKind::Redis => {
            let publisher: Arc<dyn Backplane> =
                Arc::new(RedisBackplane::new(&config.backplane.url)?);
            let subscriber: Arc<dyn Backplane> =
                Arc::new(RedisBackplane::new(config.backplane.subscriber_url())?);
            Ok((publisher, subscriber))
        }
        BackplaneKind::Memory => {
            warn!("Using the in-process memory backplane; events stay within this process");
            let backplane = MemoryBackplane::new();
            let publisher: Arc<dyn Backplane> = Arc::new(backplane.clone());
            let subscriber: Arc<dyn Backplane> = Arc::new(backplane);
            Ok((publisher, subscriber))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::test_config;

    #[tokio::test]
    async fn test_memory_backplanes_share_one_bus() {
        let config = test_config();
        let (publisher, subscriber) = backplanes(&config).unwrap();
        assert_eq!(publisher.address(), subscriber.address());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_startup() {
        let mut config = test_config();
        config.database.url = "sqlite:///nonexistent-dir/chatty.db?mode=ro".to_string();
        config.database.connect_timeout_secs = 1;

        let err = connect_storage(&config).await.unwrap_err();
        assert!(matches!(err, StartupError::Storage(_)));
    }

    #[tokio::test]
    async fn test_bridge_starts_on_memory_backplane() {
        let config = test_config();
        let bridge = init_bridge(&config).await.unwrap();
        assert!(bridge.health().is_fully_connected());
        bridge.shutdown().await;
    }
}
