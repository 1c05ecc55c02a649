//! WebSocket transport
//!
//! - /socket - topic subscriptions and event delivery

pub mod protocol;
pub mod socket;

pub use socket::socket_handler;

use crate::api::error::not_found;
use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/socket", get(socket_handler).fallback(not_found))
}
