//! WebSocket connection handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::state::RelayState;
use crate::events::{is_lifecycle_event, split_event_name, Frame};

/// Event a client sends to check liveness; answered with [`PONG_EVENT`]
pub const PING_EVENT: &str = "ping";
pub const PONG_EVENT: &str = "pong";
/// Sent to a client that fell behind the broadcast buffer
pub const LAGGED_EVENT: &str = "relay:lagged";

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Token from the `Authorization` header, falling back to `?token=`
pub(crate) fn request_token<'a>(headers: &'a HeaderMap, params: &'a WsParams) -> Option<&'a str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .or(params.token.as_deref())
        .filter(|t| !t.trim().is_empty())
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let claims = match state.authorize(request_token(&headers, &params)) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "rejected socket upgrade");
            return e.into_response();
        }
    };
    let subject = claims.map(|c| c.sub);

    ws.on_upgrade(move |socket| handle_socket(socket, state, subject))
}

/// Handle an individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: Arc<RelayState>, subject: Option<String>) {
    let mut rx = state.subscribe();
    let mut shutdown = state.shutdown_signal();
    if state.is_shutting_down() {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    state.client_connected();
    tracing::info!(user = subject.as_deref(), clients = state.client_count(), "client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(frame) => {
                        if !send_frame(&mut socket, &frame).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "client lagged behind broadcast");
                        let notice = Frame::new(LAGGED_EVENT, json!({ "missed": n }));
                        if !send_frame(&mut socket, &notice).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, &mut socket, &state, subject.as_deref()).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = shutdown.changed() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "relay shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    state.client_disconnected();
    tracing::info!(user = subject.as_deref(), clients = state.client_count(), "client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> bool {
    match frame.to_text() {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::warn!(event = %frame.event, error = %e, "failed to encode frame");
            true
        }
    }
}

/// Handle a message from the client.
/// Returns false if the connection should be closed.
async fn handle_client_message(
    msg: Message,
    socket: &mut WebSocket,
    state: &RelayState,
    subject: Option<&str>,
) -> bool {
    match msg {
        Message::Text(text) => {
            let frame = match Frame::from_text(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed client frame");
                    return true;
                }
            };
            if frame.event == PING_EVENT {
                return send_frame(socket, &Frame::new(PONG_EVENT, frame.data)).await;
            }
            if split_event_name(&frame.event).is_some() {
                // Clients may announce their own changes; everyone hears them
                tracing::debug!(event = %frame.event, user = subject, "relaying client change event");
                state.publish(frame);
            } else if is_lifecycle_event(&frame.event) {
                tracing::debug!(event = %frame.event, "ignoring reserved event name from client");
            } else {
                tracing::debug!(event = %frame.event, "ignoring unknown client event");
            }
            true
        }
        Message::Binary(_) => true,
        // axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}
