//! API key extractor for server-to-server endpoints
//!
//! `RequireApiKey` admits a request when `server.api_key` is unset, or when the
//! request presents the same key as `Authorization: Bearer <key>` or
//! `X-API-Key: <key>`. Rejections go through the API error taxonomy.

use crate::api::error::ApiError;
use crate::server::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

/// Guard for handlers callable by other services
pub struct RequireApiKey;

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireApiKey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = parts.extensions.get::<AppState>().ok_or_else(|| {
            error!("AppState extension missing");
            ApiError::internal()
        })?;

        let Some(expected) = state.config.server.api_key.as_ref() else {
            return Ok(Self);
        };

        let presented = extract_key(parts)
            .ok_or_else(|| ApiError::not_authorized("missing credentials"))?;

        if bool::from(presented.as_bytes().ct_eq(expected.expose_secret().as_bytes())) {
            Ok(Self)
        } else {
            warn!(path = %parts.uri.path(), "Rejected request with an invalid API key");
            Err(ApiError::not_authorized("bad token"))
        }
    }
}

/// Key from `Authorization: Bearer` first, then `X-API-Key`
fn extract_key(parts: &Parts) -> Option<&str> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    bearer
        .or_else(|| parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}
