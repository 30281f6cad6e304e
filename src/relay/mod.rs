//! Relay endpoint: the server side of the socket protocol
//!
//! - `GET /ws`: WebSocket; every published frame goes to every client
//! - `POST /events`: publish one `{ "event", "data" }` frame (202)
//! - `GET /health`: `OK`
//!
//! Configuration from the environment:
//! - `RELAY_LISTEN` (default `127.0.0.1:5000`)
//! - `RELAY_JWT_SECRET`: when set, tokens are required
//! - `RELAY_CHANNEL_CAPACITY` (default 1024)

pub mod auth;
pub mod handler;
pub mod http;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use auth::{Claims, TokenValidator};
pub use http::create_router;
pub use state::{RelayState, DEFAULT_CHANNEL_CAPACITY};

use crate::error::{Result, SyncError};
use crate::events::Frame;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: String,
    pub jwt_secret: Option<String>,
    pub channel_capacity: usize,
}

impl RelayConfig {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            jwt_secret: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn from_env() -> Self {
        let mut config =
            Self::new(std::env::var("RELAY_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string()));
        if let Ok(secret) = std::env::var("RELAY_JWT_SECRET") {
            if !secret.trim().is_empty() {
                config.jwt_secret = Some(secret);
            }
        }
        if let Some(capacity) = std::env::var("RELAY_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.channel_capacity = capacity;
        }
        config
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    fn build_state(&self) -> Arc<RelayState> {
        let validator = self.jwt_secret.as_deref().map(TokenValidator::new);
        Arc::new(RelayState::new(self.channel_capacity, validator))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN)
    }
}

/// A relay running in the background
pub struct RelayHandle {
    addr: SocketAddr,
    state: Arc<RelayState>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RelayHandle {
    /// Bound address (useful with port 0)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://<addr>/api/v1`, the base a client would be configured with
    pub fn api_base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn publish(&self, frame: Frame) -> usize {
        self.state.publish(frame)
    }

    /// Close every socket, stop listening and wait for the server to exit
    pub async fn shutdown(self) -> Result<()> {
        self.state.trigger_shutdown();
        match self.task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))),
        }
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .finish()
    }
}

/// Bind and serve in a background task
pub async fn spawn_relay(config: RelayConfig) -> Result<RelayHandle> {
    let listener = TcpListener::bind(&config.listen).await?;
    let addr = listener.local_addr()?;
    let state = config.build_state();
    let app = create_router(state.clone());

    let mut signal = state.shutdown_signal();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.wait_for(|stop| *stop).await;
            })
            .await
    });

    tracing::info!(%addr, auth = state.requires_auth(), "relay listening");
    Ok(RelayHandle { addr, state, task })
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(config: RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = spawn_relay(config).await?;
    shutdown.await;
    tracing::info!("relay shutting down");
    handle.shutdown().await
}
