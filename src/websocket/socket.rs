//! `/socket` connection handler
//!
//! Each upgraded socket is registered with the connection registry for its
//! whole lifetime. Events routed to it by the fan-out arrive on a bounded
//! queue and are written out in order alongside replies to client frames.

use super::protocol::{ClientFrame, ServerFrame};
use crate::api::error::ApiError;
use crate::server::AppState;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Extension;
use axum::response::Response;
use chatty_core::{
    is_valid_topic, BridgeError, Connection, ConnectionId, Delivery, Event, RegistrationHandle,
    RegistryError,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Events buffered per connection before new ones are dropped
const OUTBOUND_CAPACITY: usize = 256;

/// WebSocket upgrade handler
pub async fn socket_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Extension(state): Extension<AppState>,
) -> Result<Response, ApiError> {
    Ok(ws?.on_upgrade(move |socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, outbound) = Connection::channel(OUTBOUND_CAPACITY);
    let connection_id = connection.id();

    let registration = match state.registry.register(connection) {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "Rejected WebSocket connection");
            return;
        }
    };

    run_connection(socket, state, registration, outbound)
        .instrument(info_span!("socket", connection_id = %connection_id))
        .await;
}

async fn run_connection(
    socket: WebSocket,
    state: AppState,
    registration: RegistrationHandle,
    mut outbound: mpsc::Receiver<Arc<Event>>,
) {
    let task = state.shutdown.register_task();
    let token = task.token();
    let connection_id = registration.id();
    info!(total = state.registry.len(), "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    if send_frame(&mut sender, &ServerFrame::Connected { connection_id })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&state, connection_id, &text).await {
                        if send_frame(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            },
            event = outbound.recv() => match event {
                Some(event) => {
                    if send_frame(&mut sender, &ServerFrame::from(event.as_ref())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = token.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    drop(registration);
    info!("WebSocket connection closed");
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            Ok(())
        }
    }
}

/// Parse and handle one text frame; returns the reply, if any
pub(crate) async fn handle_text(
    state: &AppState,
    connection_id: ConnectionId,
    text: &str,
) -> Option<ServerFrame> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => handle_frame(state, connection_id, frame).await,
        Err(e) => Some(ServerFrame::error(
            format!("Invalid message format: {}", e),
            "INVALID_MESSAGE",
        )),
    }
}

pub(crate) async fn handle_frame(
    state: &AppState,
    connection_id: ConnectionId,
    frame: ClientFrame,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::Subscribe { topics } => {
            if let Some(topic) = topics.iter().find(|t| !is_valid_topic(t)) {
                return Some(ServerFrame::error(
                    format!("invalid topic '{}'", topic),
                    "INVALID_TOPIC",
                ));
            }
            let Some(connection) = state.registry.get(connection_id) else {
                return Some(ServerFrame::error(
                    RegistryError::UnknownConnection(connection_id).to_string(),
                    "UNKNOWN_CONNECTION",
                ));
            };

            let fresh: BTreeSet<&str> = topics
                .iter()
                .map(String::as_str)
                .filter(|t| !connection.is_subscribed(t))
                .collect();
            let limit = state.config.server.max_topics_per_connection;
            if connection.topics().len() + fresh.len() > limit {
                return Some(ServerFrame::error(
                    format!("at most {} topics per connection", limit),
                    "TOO_MANY_TOPICS",
                ));
            }

            for topic in fresh {
                if let Err(e) = state.registry.subscribe(connection_id, topic) {
                    return Some(ServerFrame::error(e.to_string(), "UNKNOWN_CONNECTION"));
                }
            }
            debug!(?topics, "Subscribed");
            Some(current_subscriptions(state, connection_id))
        }
        ClientFrame::Unsubscribe { topics } => {
            for topic in &topics {
                if let Err(e) = state.registry.unsubscribe(connection_id, topic) {
                    return Some(ServerFrame::error(e.to_string(), "UNKNOWN_CONNECTION"));
                }
            }
            debug!(?topics, "Unsubscribed");
            Some(current_subscriptions(state, connection_id))
        }
        ClientFrame::Publish { topic, payload } => {
            match state.bridge.emit(&topic, payload).await {
                Ok(Delivery::Backplane) => None,
                Ok(Delivery::LocalOnly) => {
                    debug!(topic = %topic, "Event delivered to this process only");
                    None
                }
                Err(e @ BridgeError::InvalidTopic(_)) => {
                    Some(ServerFrame::error(e.to_string(), "INVALID_TOPIC"))
                }
                Err(e) => Some(ServerFrame::error(e.to_string(), "PUBLISH_FAILED")),
            }
        }
        ClientFrame::Identify { user_id } => {
            match state.registry.set_user(connection_id, user_id) {
                Ok(()) => None,
                Err(e) => Some(ServerFrame::error(e.to_string(), "UNKNOWN_CONNECTION")),
            }
        }
        ClientFrame::Ping => Some(ServerFrame::Pong),
    }
}

fn current_subscriptions(state: &AppState, connection_id: ConnectionId) -> ServerFrame {
    ServerFrame::Subscribed {
        topics: state
            .registry
            .get(connection_id)
            .map(|connection| connection.topics())
            .unwrap_or_default(),
    }
}
