//! REST API
//!
//! - `/health`, `/health/detailed`: liveness and component diagnostics
//! - `/api/v1/events/:topic`: emit an event to all subscribers

pub mod error;
pub mod events;
pub mod health;

use axum::Router;

pub use events::events_routes;
pub use health::health_routes;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new().merge(health_routes()).merge(events_routes())
}
