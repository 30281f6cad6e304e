//! Connection management
//!
//! - [`SocketClient`]: process-wide manager owning at most one live connection
//! - [`Connection`]: cloneable handle to that connection
//! - `task`: the background loop that owns the socket
//! - `reconnect`: retry schedule
//! - `credentials`: ambient token lookup

pub mod client;
pub mod credentials;
pub mod reconnect;
mod task;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, SyncError};
use crate::events::Frame;
use crate::registry::{EventRegistry, Subscription};

pub use client::SocketClient;
pub use credentials::{
    CredentialStore, EnvCredentialStore, FileCredentialStore, NoCredentials, StaticCredential,
};
pub use reconnect::{Backoff, ReconnectPolicy, Step};

pub(crate) use task::{Command, Listeners, TransportTask};

/// Why a connection ended for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called or every handle was dropped
    ClientClosed,
    /// Every retry failed
    ReconnectExhausted { attempts: u32 },
    /// Reconnection is turned off and the socket was lost
    ReconnectDisabled,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientClosed => write!(f, "closed by client"),
            DisconnectReason::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {} reconnect attempts", attempts)
            }
            DisconnectReason::ReconnectDisabled => write!(f, "connection lost, reconnect disabled"),
        }
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First attempt in progress
    Connecting,
    Connected,
    /// Waiting for or making retry number `attempt`
    Reconnecting { attempt: u32 },
    /// Terminal; only a new `connect()` brings the client back
    Disconnected { reason: DisconnectReason },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Disconnected { reason } => write!(f, "disconnected ({})", reason),
        }
    }
}

struct Shared {
    id: u64,
    registry: EventRegistry,
    state_rx: watch::Receiver<ConnectionState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    attempts: Arc<AtomicU32>,
}

/// Handle to one transport instance. Clones share it.
///
/// Subscriptions made through a handle survive reconnects: the registry
/// belongs to the connection, not to the socket underneath it.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        registry: EventRegistry,
        state_rx: watch::Receiver<ConnectionState>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        attempts: Arc<AtomicU32>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                registry,
                state_rx,
                cmd_tx,
                attempts,
            }),
        }
    }

    /// Instance id, unique per `SocketClient`
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch channel for passive status indicators
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    /// Retries made since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Subscribe to a named event (server events or lifecycle events)
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.registry.on(event, handler)
    }

    /// Queue an outbound event. Frames emitted while the socket is down are
    /// sent after the next successful connect.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> Result<()> {
        if self.state().is_terminal() {
            return Err(SyncError::NotConnected);
        }
        self.shared
            .cmd_tx
            .send(Command::Emit(Frame::new(event, data)))
            .map_err(|_| SyncError::NotConnected)
    }

    /// Resolve once connected; fail if the connection ends first
    pub async fn wait_connected(&self) -> Result<()> {
        self.wait_for(|state| state.is_connected()).await.map(|_| ())
    }

    /// Resolve once the connection reaches a terminal state
    pub async fn wait_closed(&self) -> DisconnectReason {
        match self.wait_for(|state| state.is_terminal()).await {
            Ok(ConnectionState::Disconnected { reason }) => reason,
            _ => DisconnectReason::ClientClosed,
        }
    }

    /// Wait until `pred` holds. A terminal state that does not satisfy
    /// `pred` is reported as `SyncError::Disconnected`.
    pub async fn wait_for<P>(&self, pred: P) -> Result<ConnectionState>
    where
        P: Fn(&ConnectionState) -> bool,
    {
        let mut rx = self.shared.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            if pred(&state) {
                return Ok(state);
            }
            if let ConnectionState::Disconnected { reason } = state {
                return Err(SyncError::Disconnected(reason.to_string()));
            }
            if rx.changed().await.is_err() {
                let state = *rx.borrow();
                return if pred(&state) {
                    Ok(state)
                } else {
                    Err(SyncError::Disconnected("transport task ended".to_string()))
                };
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.shared.cmd_tx.send(Command::Shutdown);
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &EventRegistry {
        &self.shared.registry
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}
