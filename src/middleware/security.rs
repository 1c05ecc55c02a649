//! Security headers and CORS

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Hardening headers added to every response that does not set them itself
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", "default-src 'self';base-uri 'self';frame-ancestors 'self';object-src 'none'"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Wrap `router` with the security header layers
pub fn with_security_headers(router: Router) -> Router {
    SECURITY_HEADERS.iter().fold(router, |router, &(name, value)| {
        router.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ))
    })
}

/// CORS for the single configured client origin, with credentials
///
/// # Errors
///
/// Returns the rejected origin when it is not a valid header value
pub fn cors_layer(client_url: &str) -> Result<CorsLayer, String> {
    let origin = client_url.trim().trim_end_matches('/');
    let origin = HeaderValue::from_str(origin).map_err(|_| origin.to_string())?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(600)))
}
