//! API error taxonomy and the catch-all handlers
//!
//! Every error response has the body
//! `{"message": ..., "statusCode": ..., "status": "error"}`; unmatched routes
//! answer `{"message": "<path> not found"}`.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::OriginalUri;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatty_core::BridgeError;
use serde::Serialize;
use std::any::Any;
use thiserror::Error;
use tracing::{error, warn};

/// Error categories and their HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotAuthorized,
    NotFound,
    FileTooLarge,
    ValidationError,
    ServerError,
    /// Anything not classified above
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest | Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::NotAuthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServerError => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error returned by handlers
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Serialized error body
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub status_code: u16,
    pub status: &'static str,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthorized, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Classify an extractor rejection by the status axum gave it
    fn from_rejection(status: StatusCode, text: String) -> Self {
        let kind = match status {
            StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::FileTooLarge,
            StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::ValidationError,
            s if s.is_server_error() => {
                error!(status = %s, rejection = %text, "Extractor failed");
                return Self::internal();
            }
            _ => ErrorKind::BadRequest,
        };
        Self::new(kind, text)
    }

    /// Response body for this error
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            message: self.message.clone(),
            status_code: self.status().as_u16(),
            status: "error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = ?err, "Unhandled error");
        Self::internal()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidTopic(_) => Self::bad_request(err.to_string()),
            BridgeError::PublishFailed { .. } | BridgeError::BackplaneUnavailable { .. } => {
                warn!(error = %err, "Backplane unavailable");
                Self::server_error(err.to_string())
            }
            BridgeError::Encoding(_) => {
                error!(error = %err, "Event encoding failed");
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<WebSocketUpgradeRejection> for ApiError {
    fn from(rejection: WebSocketUpgradeRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// Fallback for unmatched routes and unsupported methods
///
/// The body carries only the message; the URI keeps its query string.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> Response {
    let err = ApiError::new(ErrorKind::NotFound, format!("{} not found", uri));
    (err.status(), Json(serde_json::json!({ "message": err.message }))).into_response()
}

/// Response for a handler that panicked
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };
    error!(panic = detail, "Handler panicked");
    ApiError::internal().into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::NotAuthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::FileTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorKind::ValidationError.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::ServerError.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorKind::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_body_shape() {
        let body = ApiError::new(ErrorKind::NotAuthorized, "Token is invalid").body();
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "message": "Token is invalid",
                "statusCode": 401,
                "status": "error"
            })
        );
    }

    #[test]
    fn test_anyhow_becomes_internal() {
        let err: ApiError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_bridge_errors() {
        let err: ApiError = BridgeError::InvalidTopic("a b".into()).into();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err: ApiError = BridgeError::PublishFailed {
            topic: "news".into(),
            reason: "down".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_panic_response() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
