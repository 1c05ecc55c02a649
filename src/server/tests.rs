//! Router tests: middleware, fallbacks and the HTTP surface

use super::config::test_config;
use super::router::build_router;
use super::state::{test_state, test_state_on, test_state_with};
use crate::middleware::HttpMiddleware;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chatty_core::storage::MockStorage;
use chatty_core::{ReconnectPolicy, StorageError, StorageSupervisor};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

async fn app() -> Router {
    let state = test_state().await;
    let middleware = HttpMiddleware::new(&state.config).unwrap();
    build_router(state, &middleware)
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_unmatched_route() {
    let response = app()
        .await
        .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(
        body_json(response).await,
        json!({"message": "/api/v1/nope not found"})
    );
}

#[tokio::test]
async fn test_unmatched_route_keeps_query() {
    let response = app()
        .await
        .oneshot(Request::get("/foo?x=1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({"message": "/foo?x=1 not found"})
    );
}

#[tokio::test]
async fn test_wrong_method_is_not_found() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/v1/events/room:a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({"message": "/api/v1/events/room:a not found"})
    );

    let response = app
        .oneshot(post_json("/socket", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"message": "/socket not found"}));
}

#[tokio::test]
async fn test_socket_without_upgrade() {
    let response = app()
        .await
        .oneshot(Request::get("/socket").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_undecodable_topic() {
    let response = app()
        .await
        .oneshot(post_json("/api/v1/events/%FF", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .await
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_detailed_health() {
    let response = app()
        .await
        .oneshot(Request::get("/health/detailed").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["degraded_mode"], false);
    assert_eq!(body["connections"], 0);
    assert_eq!(body["checks"]["database"]["status"], "healthy");
    assert_eq!(body["checks"]["publisher"]["status"], "healthy");
    assert_eq!(body["checks"]["subscriber"]["details"]["address"], "memory://local");
}

#[tokio::test]
async fn test_emit_event() {
    let response = app()
        .await
        .oneshot(post_json("/api/v1/events/room:a", r#"{"text":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["topic"], "room:a");
    assert_eq!(body["delivery"], "backplane");
}

#[tokio::test]
async fn test_emit_invalid_topic() {
    let response = app()
        .await
        .oneshot(post_json("/api/v1/events/room*", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"message": "invalid topic 'room*'", "statusCode": 400, "status": "error"})
    );
}

#[tokio::test]
async fn test_malformed_json() {
    let response = app()
        .await
        .oneshot(post_json("/api/v1/events/room:a", "{"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_body_limit() {
    let state = test_state().await;
    let mut config = test_config();
    config.server.body_limit_bytes = 16;
    let middleware = HttpMiddleware::new(&config).unwrap();
    let app = build_router(state, &middleware);

    let response = app
        .oneshot(post_json(
            "/api/v1/events/room:a",
            r#"{"text":"this body is longer than sixteen bytes"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 413);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_cors_preflight() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/events/room:a")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .unwrap(),
        "true"
    );
}

async fn boom() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_panic_becomes_500() {
    let middleware = HttpMiddleware::new(&test_config()).unwrap();
    let app = middleware.wrap_outer(Router::new().route("/boom", get(boom)));

    let response = app
        .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"message": "Internal server error", "statusCode": 500, "status": "error"})
    );
}

#[tokio::test]
async fn test_emit_requires_configured_key() {
    let mut config = test_config();
    config.server.api_key = Some("emit-token-value".to_string().into());
    let state = test_state_with(config).await;
    let middleware = HttpMiddleware::new(&state.config).unwrap();
    let app = build_router(state, &middleware);

    let with_key = |key: &str| {
        let mut request = post_json("/api/v1/events/room:a", "{}");
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", key).parse().unwrap(),
        );
        request
    };

    let response = app.clone().oneshot(with_key("wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({"message": "bad token", "statusCode": 401, "status": "error"})
    );

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/events/room:a", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["message"], "missing credentials");

    let response = app.oneshot(with_key("emit-token-value")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_http_serves_through_storage_outage() {
    let connects = Arc::new(AtomicU32::new(0));
    let mut mock = MockStorage::new();
    let connect_count = Arc::clone(&connects);
    mock.expect_connect().returning(move || {
        // Startup succeeds, every reconnect is refused
        if connect_count.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(())
        } else {
            Err(StorageError::Connection("refused".to_string()))
        }
    });
    mock.expect_ping()
        .returning(|| Err(StorageError::Ping("connection reset".to_string())));

    let supervisor = Arc::new(StorageSupervisor::new(
        Arc::new(mock),
        ReconnectPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_circuit_cooldown(Duration::from_millis(20))
            .with_jitter(false),
        Duration::from_millis(10),
    ));
    supervisor.connect().await.unwrap();

    let state = test_state_on(test_config(), Arc::clone(&supervisor)).await;
    let token = state.shutdown.token();
    let monitor = supervisor.spawn_monitor(token.clone());

    timeout(Duration::from_secs(2), async {
        while supervisor.reconnect_attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("a reconnect attempt should be observed");

    let middleware = HttpMiddleware::new(&state.config).unwrap();
    let app = build_router(state, &middleware);

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/health/detailed").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["database"]["status"], "unhealthy");
    assert_eq!(body["checks"]["publisher"]["status"], "healthy");

    token.cancel();
    timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor should stop")
        .unwrap();
}
