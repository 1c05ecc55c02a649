//! Shared application state handed to handlers via `Extension`

use super::config::AppConfig;
use chatty_core::{BroadcastBridge, ConnectionRegistry, ShutdownController, StorageSupervisor};
use std::sync::Arc;

/// Components every handler may reach
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub bridge: BroadcastBridge,
    pub storage: Arc<StorageSupervisor>,
    pub shutdown: Arc<ShutdownController>,
}

/// State wired like production, on the memory backplane and in-memory SQLite
#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    test_state_with(super::config::test_config()).await
}

#[cfg(test)]
pub(crate) async fn test_state_with(config: AppConfig) -> AppState {
    use chatty_core::SqlStorage;

    let storage = Arc::new(StorageSupervisor::new(
        Arc::new(SqlStorage::new(
            config.database.url.clone(),
            config.database.storage_options(),
        )),
        config.reconnect.policy(),
        config.database.health_check_interval(),
    ));
    storage.connect().await.unwrap();
    test_state_on(config, storage).await
}

/// Test state around an already connected storage supervisor
#[cfg(test)]
pub(crate) async fn test_state_on(config: AppConfig, storage: Arc<StorageSupervisor>) -> AppState {
    use chatty_core::MemoryBackplane;

    let config = Arc::new(config);
    let backplane = MemoryBackplane::new();
    let bridge = BroadcastBridge::initialize(
        Arc::new(backplane.clone()),
        Arc::new(backplane),
        config.bridge_config(),
    )
    .await
    .unwrap();

    let registry = Arc::new(ConnectionRegistry::new());
    let fanout = Arc::clone(&registry);
    bridge.on_event(move |event| {
        fanout.fan_out(&event);
    });

    AppState {
        config,
        registry,
        bridge,
        storage,
        shutdown: ShutdownController::new(),
    }
}
