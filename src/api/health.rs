//! Health check endpoints
//!
//! - `/health` answers as long as the process serves HTTP (for load balancers)
//! - `/health/detailed` reports the database and both backplane handles

use crate::server::AppState;
use axum::extract::Extension;
use axum::response::Json;
use super::error::not_found;
use axum::routing::get;
use axum::Router;
use chatty_core::{HandleStatus, StorageSupervisor};
use serde::Serialize;
use std::time::{Duration, Instant};

const DATABASE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response with per-component checks
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub degraded_mode: bool,
    pub connections: usize,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub publisher: ComponentHealth,
    pub subscriber: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn healthy_with_details(latency_ms: Option<u64>, details: serde_json::Value) -> Self {
        Self {
            status: "healthy",
            latency_ms,
            error: None,
            details: Some(details),
        }
    }

    fn unhealthy_with_details(error: String, details: serde_json::Value) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
            details: Some(details),
        }
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn detailed_health_check(
    Extension(state): Extension<AppState>,
) -> Json<DetailedHealthResponse> {
    let database = check_database(&state.storage).await;
    let bridge = state.bridge.health();
    let publisher = check_handle(&bridge.publisher);
    let subscriber = check_handle(&bridge.subscriber);

    let components = [database.status, publisher.status, subscriber.status];
    let healthy_count = components.iter().filter(|s| **s == "healthy").count();

    let overall_status = if healthy_count == components.len() {
        "healthy"
    } else if healthy_count > 0 {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(DetailedHealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.to_string(),
        degraded_mode: bridge.degraded,
        connections: state.registry.len(),
        checks: HealthChecks {
            database,
            publisher,
            subscriber,
        },
    })
}

/// Round-trip the database unless the supervisor already knows it is down
async fn check_database(storage: &StorageSupervisor) -> ComponentHealth {
    let details = serde_json::json!({
        "state": storage.state(),
        "reconnect_attempts": storage.reconnect_attempts(),
    });

    if !storage.is_connected() {
        return ComponentHealth::unhealthy_with_details("not connected".to_string(), details);
    }

    let start = Instant::now();
    match tokio::time::timeout(DATABASE_PING_TIMEOUT, storage.ping()).await {
        Ok(Ok(())) => ComponentHealth::healthy_with_details(
            Some(start.elapsed().as_millis() as u64),
            details,
        ),
        Ok(Err(e)) => ComponentHealth::unhealthy_with_details(e.to_string(), details),
        Err(_) => ComponentHealth::unhealthy_with_details("ping timed out".to_string(), details),
    }
}

fn check_handle(handle: &HandleStatus) -> ComponentHealth {
    let details = serde_json::json!({
        "address": handle.address,
        "state": handle.state,
        "reconnect_attempts": handle.reconnect_attempts,
    });

    if handle.is_connected() {
        ComponentHealth::healthy_with_details(None, details)
    } else {
        ComponentHealth::unhealthy_with_details(format!("{} handle is down", handle.role), details)
    }
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check).fallback(not_found))
        .route(
            "/health/detailed",
            get(detailed_health_check).fallback(not_found),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatty_core::{HandleRole, LinkState};

    fn handle(state: LinkState) -> HandleStatus {
        HandleStatus {
            role: HandleRole::Subscriber,
            address: "redis://cache:6379".to_string(),
            state,
            reconnect_attempts: 3,
        }
    }

    #[test]
    fn test_connected_handle_is_healthy() {
        let h = check_handle(&handle(LinkState::Connected));
        assert_eq!(h.status, "healthy");
        assert!(h.error.is_none());
        assert_eq!(h.details.unwrap()["reconnect_attempts"], 3);
    }

    #[test]
    fn test_disconnected_handle_is_unhealthy() {
        let h = check_handle(&handle(LinkState::Disconnected));
        assert_eq!(h.status, "unhealthy");
        assert_eq!(h.error.as_deref(), Some("subscriber handle is down"));
    }

    #[test]
    fn test_health_response_serialization() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }
}
