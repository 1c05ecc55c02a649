//! HTTP router assembly

use super::state::AppState;
use crate::api::api_router;
use crate::api::error::not_found;
use crate::middleware::HttpMiddleware;
use crate::websocket::websocket_router;
use axum::{Extension, Router};

/// Routes, middleware and the catch-all handlers, in registration order
pub fn build_router(state: AppState, middleware: &HttpMiddleware) -> Router {
    let routes = Router::new()
        .merge(api_router())
        .merge(websocket_router())
        .fallback(not_found);

    let app = middleware
        .wrap_routes(routes)
        .layer(Extension(state));

    middleware.wrap_outer(app)
}
