//! Background transport task
//!
//! One task per [`Connection`](super::Connection). It is the only code that
//! touches the socket: it dials, pumps frames into the registries, sends
//! outbound frames, and runs the reconnect schedule. Attempts are serialized
//! because there is only ever this one loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::reconnect::{Backoff, Step};
use super::{ConnectionState, DisconnectReason};
use crate::error::{Result, SyncError};
use crate::events::{is_lifecycle_event, Frame, CONNECT};
use crate::registry::EventRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames kept for sending while the socket is down
const MAX_BUFFERED_FRAMES: usize = 1024;

/// Requests from the public handle
pub(crate) enum Command {
    Emit(Frame),
    Shutdown,
}

/// Handlers scoped to one connection, then the client-wide ones that
/// outlive it. Connection handlers run first.
#[derive(Clone)]
pub(crate) struct Listeners {
    pub(crate) connection: EventRegistry,
    pub(crate) client: EventRegistry,
}

impl Listeners {
    fn dispatch(&self, event: &str, data: &Value) -> usize {
        self.connection.dispatch(event, data) + self.client.dispatch(event, data)
    }
}

enum Exit {
    Shutdown,
    Lost(String),
}

pub(crate) struct TransportTask {
    pub(crate) id: u64,
    pub(crate) url: Url,
    pub(crate) token: Option<String>,
    pub(crate) backoff: Backoff,
    pub(crate) connect_timeout: Duration,
    pub(crate) listeners: Listeners,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) attempts: Arc<AtomicU32>,
    pub(crate) cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub(crate) outbox: VecDeque<Frame>,
}

impl TransportTask {
    pub(crate) async fn run(mut self) {
        loop {
            let result = {
                let connecting = establish(&self.url, self.token.as_deref(), self.connect_timeout);
                tokio::pin!(connecting);
                loop {
                    tokio::select! {
                        res = &mut connecting => break Some(res),
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(Command::Emit(frame)) => buffer(&mut self.outbox, frame),
                            Some(Command::Shutdown) | None => break None,
                        }
                    }
                }
            };

            match result {
                None => return self.close(),
                Some(Ok(ws)) => {
                    self.backoff.reset();
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(connection = self.id, url = %self.url, "socket connected");
                    self.listeners.dispatch(CONNECT, &Value::Null);

                    match self.pump(ws).await {
                        Exit::Shutdown => return self.close(),
                        Exit::Lost(reason) => {
                            tracing::warn!(connection = self.id, %reason, "socket disconnected");
                            emit_local(&self.listeners, Frame::disconnect(&reason));
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(connection = self.id, error = %e, "socket connection error");
                    emit_local(&self.listeners, Frame::connect_error(&e.to_string()));
                }
            }

            match self.backoff.next_step() {
                Step::Retry { attempt, delay } => {
                    self.attempts.store(attempt, Ordering::SeqCst);
                    self.set_state(ConnectionState::Reconnecting { attempt });
                    tracing::debug!(connection = self.id, attempt, ?delay, "reconnect scheduled");
                    if !self.wait_buffering(delay).await {
                        return self.close();
                    }
                    emit_local(&self.listeners, Frame::reconnect_attempt(attempt));
                }
                Step::Exhausted { attempts } => {
                    tracing::warn!(connection = self.id, attempts, "reconnect attempts exhausted");
                    emit_local(&self.listeners, Frame::reconnect_failed(attempts));
                    return self.finish(DisconnectReason::ReconnectExhausted { attempts });
                }
                Step::Disabled => return self.finish(DisconnectReason::ReconnectDisabled),
            }
        }
    }

    /// Run an open socket until it is lost or shutdown is requested
    async fn pump(&mut self, mut ws: WsStream) -> Exit {
        while let Some(frame) = self.outbox.pop_front() {
            if let Err(e) = send_frame(&mut ws, &frame).await {
                self.outbox.push_front(frame);
                return Exit::Lost(e.to_string());
            }
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit(frame)) => {
                        if let Err(e) = send_frame(&mut ws, &frame).await {
                            buffer(&mut self.outbox, frame);
                            return Exit::Lost(e.to_string());
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = ws.close(None).await;
                        return Exit::Shutdown;
                    }
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => deliver(&self.listeners, self.id, &text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => deliver(&self.listeners, self.id, &text),
                        Err(_) => tracing::warn!(connection = self.id, "dropping non-UTF-8 binary frame"),
                    },
                    // tungstenite answers pings itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed connection".to_string());
                        return Exit::Lost(reason);
                    }
                    Some(Err(e)) => return Exit::Lost(e.to_string()),
                    None => return Exit::Lost("stream ended".to_string()),
                }
            }
        }
    }

    /// Sleep for `delay` while buffering emits. Returns false on shutdown.
    async fn wait_buffering(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit(frame)) => buffer(&mut self.outbox, frame),
                    Some(Command::Shutdown) | None => return false,
                },
                _ = &mut sleep => return true,
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Client-requested shutdown, from any phase of the loop
    fn close(self) {
        emit_local(&self.listeners, Frame::disconnect("client disconnect"));
        self.finish(DisconnectReason::ClientClosed)
    }

    fn finish(self, reason: DisconnectReason) {
        tracing::info!(connection = self.id, %reason, "socket closed");
        self.set_state(ConnectionState::Disconnected { reason });
    }
}

async fn establish(url: &Url, token: Option<&str>, timeout: Duration) -> Result<WsStream> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SyncError::Auth("token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    tracing::debug!(url = %url, authenticated = token.is_some(), "dialing socket");
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| SyncError::Timeout(timeout.as_millis() as u64))??;
    Ok(ws)
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<()> {
    let text = frame.to_text()?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

fn buffer(outbox: &mut VecDeque<Frame>, frame: Frame) {
    if outbox.len() >= MAX_BUFFERED_FRAMES {
        if let Some(dropped) = outbox.pop_front() {
            tracing::warn!(event = %dropped.event, "send buffer full, dropping oldest frame");
        }
    }
    outbox.push_back(frame);
}

fn deliver(listeners: &Listeners, connection: u64, text: &str) {
    let frame = match Frame::from_text(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection, error = %e, "ignoring malformed frame");
            return;
        }
    };
    if is_lifecycle_event(&frame.event) {
        tracing::debug!(connection, event = %frame.event, "ignoring reserved event name from server");
        return;
    }
    let handlers = listeners.dispatch(&frame.event, &frame.data);
    tracing::debug!(connection, event = %frame.event, handlers, "event delivered");
}

fn emit_local(listeners: &Listeners, frame: Frame) {
    listeners.dispatch(&frame.event, &frame.data);
}
