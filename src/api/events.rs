//! Event publishing over HTTP
//!
//! `POST /api/v1/events/:topic` emits the JSON body to every subscriber of
//! `topic` across all server processes.

use super::error::{not_found, ApiError};
use crate::middleware::RequireApiKey;
use crate::server::AppState;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use chatty_core::Delivery;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct EmitResponse {
    pub topic: String,
    pub delivery: Delivery,
    pub origin: Uuid,
}

async fn emit_event(
    _key: RequireApiKey,
    Extension(state): Extension<AppState>,
    topic: Result<Path<String>, PathRejection>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<EmitResponse>), ApiError> {
    let Path(topic) = topic?;
    let Json(payload) = payload?;
    let delivery = state.bridge.emit(&topic, payload).await?;
    debug!(topic = %topic, ?delivery, "Event emitted over HTTP");

    Ok((
        StatusCode::ACCEPTED,
        Json(EmitResponse {
            topic,
            delivery,
            origin: state.bridge.origin(),
        }),
    ))
}

pub fn events_routes() -> Router {
    Router::new().route(
        "/api/v1/events/:topic",
        post(emit_event).fallback(not_found),
    )
}
