//! HTTP middleware stack
//!
//! Request order, outermost first: panic catcher, tracing, compression,
//! security headers, CORS, parameter pollution guard, body limit, handlers.

pub mod auth;
pub mod hpp;
pub mod security;

pub use auth::RequireApiKey;
pub use hpp::ParamPollutionLayer;

use crate::api::error::handle_panic;
use crate::server::config::AppConfig;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Middleware settings resolved from configuration before the bridge starts
#[derive(Debug, Clone)]
pub struct HttpMiddleware {
    cors: CorsLayer,
    body_limit: usize,
}

impl HttpMiddleware {
    /// # Errors
    ///
    /// Returns the client origin when it cannot be used as a CORS origin
    pub fn new(config: &AppConfig) -> Result<Self, String> {
        Ok(Self {
            cors: security::cors_layer(&config.server.client_url)?,
            body_limit: config.server.body_limit_bytes,
        })
    }

    /// Security and body-limit layers, applied around the routes
    pub fn wrap_routes(&self, router: Router) -> Router {
        let router = router
            .layer(DefaultBodyLimit::max(self.body_limit))
            .layer(ParamPollutionLayer)
            .layer(self.cors.clone());
        security::with_security_headers(router)
    }

    /// Compression, tracing and the panic catcher; applied last so they see everything
    pub fn wrap_outer(&self, router: Router) -> Router {
        router
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(handle_panic))
    }
}
