//! Process-wide socket manager

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::credentials::{
    resolve_token, CredentialStore, FileCredentialStore, NoCredentials, StaticCredential,
};
use super::reconnect::Backoff;
use super::{Connection, ConnectionState, Listeners, TransportTask};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::registry::{EventRegistry, Subscription};

/// Owns at most one live [`Connection`].
///
/// `connect` is idempotent while a connection is connecting, connected or
/// reconnecting. Views subscribe and unsubscribe freely; only `disconnect`
/// (or dropping the client) closes the socket.
///
/// Subscriptions made through [`SocketClient::on`] belong to the client, not
/// to a connection, so they keep firing across reconnects and later
/// `connect` calls.
pub struct SocketClient {
    config: SyncConfig,
    url: Url,
    credentials: Arc<dyn CredentialStore>,
    views: EventRegistry,
    current: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl SocketClient {
    /// Build a client. The credential store is chosen from the config:
    /// `token`, then `credential_file`, then anonymous.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let url = config.websocket_url()?;
        let credentials: Arc<dyn CredentialStore> = match (&config.token, &config.credential_file) {
            (Some(token), _) => Arc::new(StaticCredential(token.clone())),
            (None, Some(path)) => Arc::new(FileCredentialStore::new(path.clone())),
            (None, None) => Arc::new(NoCredentials),
        };
        Ok(Self {
            config,
            url,
            credentials,
            views: EventRegistry::new(),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn websocket_url(&self) -> &Url {
        &self.url
    }

    /// Return the current connection, or start a new one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, credential: Option<&str>) -> Connection {
        let mut current = self.current.lock();
        if let Some(conn) = current.as_ref() {
            if !conn.state().is_terminal() {
                tracing::debug!(connection = conn.id(), "connect: reusing live connection");
                return conn.clone();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = resolve_token(credential, self.credentials.as_ref());
        let registry = EventRegistry::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicU32::new(0));

        tracing::info!(
            connection = id,
            url = %self.url,
            authenticated = token.is_some(),
            "opening socket connection"
        );

        let task = TransportTask {
            id,
            url: self.url.clone(),
            token,
            backoff: Backoff::new(self.config.reconnect),
            connect_timeout: self.config.connect_timeout,
            listeners: Listeners {
                connection: registry.clone(),
                client: self.views.clone(),
            },
            state_tx,
            attempts: attempts.clone(),
            cmd_rx,
            outbox: VecDeque::new(),
        };
        let guard = LiveGuard::new(self.live.clone());
        tokio::spawn(async move {
            let _guard = guard;
            task.run().await;
        });

        let conn = Connection::new(id, registry, state_rx, cmd_tx, attempts);
        *current = Some(conn.clone());
        conn
    }

    /// Close the connection (logout). A later `connect` starts fresh.
    pub fn disconnect(&self) {
        if let Some(conn) = self.current.lock().take() {
            tracing::info!(connection = conn.id(), "disconnect requested");
            conn.shutdown();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(Connection::is_connected)
            .unwrap_or(false)
    }

    /// Current handle, including one that has reached a terminal state
    pub fn connection(&self) -> Option<Connection> {
        self.current.lock().clone()
    }

    /// Subscribe for the lifetime of the returned handle. Without a
    /// connection nothing fires until a later `connect` succeeds.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event = event.into();
        if !self.is_connected() {
            tracing::debug!(%event, "subscribed while not connected");
        }
        self.views.on(event, handler)
    }

    #[cfg(test)]
    pub(crate) fn views(&self) -> &EventRegistry {
        &self.views
    }

    pub fn emit(&self, event: impl Into<String>, data: Value) -> Result<()> {
        match self.connection() {
            Some(conn) => conn.emit(event, data),
            None => Err(SyncError::NotConnected),
        }
    }

    /// Transport tasks still running, including ones winding down
    pub fn live_transports(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketClient")
            .field("url", &self.url.as_str())
            .field("connection", &self.connection())
            .field("live_transports", &self.live_transports())
            .finish()
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DisconnectReason, ReconnectPolicy};
    use crate::events::{DISCONNECT, RECONNECT_FAILED};
    use std::time::Duration;

    fn unreachable_config() -> SyncConfig {
        // Port 9 (discard) on loopback refuses connections on test hosts
        SyncConfig::new("http://127.0.0.1:9/api/v1")
            .with_reconnect(ReconnectPolicy::new(Duration::from_millis(10), 2))
            .with_connect_timeout(Duration::from_millis(500))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (count, move |_: &Value| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_subscribe_without_connection_waits() {
        let client = SocketClient::new(SyncConfig::default()).unwrap();
        let (count, handler) = counter();
        let sub = client.on("new:content", handler);
        assert!(sub.is_active());
        assert_eq!(client.views().handler_count("new:content"), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!client.is_connected());
        assert!(matches!(
            client.emit("x", Value::Null),
            Err(SyncError::NotConnected)
        ));

        drop(sub);
        assert_eq!(client.views().handler_count("new:content"), 0);
    }

    #[tokio::test]
    async fn test_client_handlers_see_every_connection() {
        let client = SocketClient::new(unreachable_config()).unwrap();
        let (failures, handler) = counter();
        let _sub = client.on(RECONNECT_FAILED, handler);

        let first = client.connect(None);
        first.wait_closed().await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        let second = client.connect(None);
        second.wait_closed().await;
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_while_dialing_emits_disconnect() {
        // Long retry delay keeps the task parked between attempts
        let config = SyncConfig::new("http://127.0.0.1:9/api/v1")
            .with_reconnect(ReconnectPolicy::new(Duration::from_secs(60), 1))
            .with_connect_timeout(Duration::from_millis(500));
        let client = SocketClient::new(config).unwrap();
        let (connection_level, on_conn) = counter();
        let (client_level, on_client) = counter();
        let _view = client.on(DISCONNECT, on_client);

        let conn = client.connect(None);
        let _sub = conn.on(DISCONNECT, on_conn);
        client.disconnect();

        assert_eq!(conn.wait_closed().await, DisconnectReason::ClientClosed);
        assert_eq!(connection_level.load(Ordering::SeqCst), 1);
        assert_eq!(client_level.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_retry_wait_emits_disconnect() {
        let config = SyncConfig::new("http://127.0.0.1:9/api/v1")
            .with_reconnect(ReconnectPolicy::new(Duration::from_secs(60), 1))
            .with_connect_timeout(Duration::from_millis(500));
        let client = SocketClient::new(config).unwrap();
        let (count, handler) = counter();

        let conn = client.connect(None);
        let _sub = conn.on(DISCONNECT, handler);
        conn.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        client.disconnect();

        assert_eq!(conn.wait_closed().await, DisconnectReason::ClientClosed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let client = SocketClient::new(unreachable_config()).unwrap();
        let a = client.connect(Some("t"));
        let b = client.connect(None);
        assert_eq!(a.id(), b.id());
        assert_eq!(client.live_transports(), 1);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_connect_after_exhaustion_starts_new_connection() {
        let client = SocketClient::new(unreachable_config()).unwrap();
        let first = client.connect(None);
        assert_eq!(
            first.wait_closed().await,
            DisconnectReason::ReconnectExhausted { attempts: 2 }
        );

        let second = client.connect(None);
        assert_ne!(first.id(), second.id());
        client.disconnect();
        assert!(client.connection().is_none());
    }

    #[test]
    fn test_credential_store_from_config() {
        let client = SocketClient::new(SyncConfig::default().with_token("cfg-token")).unwrap();
        assert_eq!(client.credentials.load(), Some("cfg-token".to_string()));

        let client = SocketClient::new(SyncConfig::default()).unwrap();
        assert_eq!(client.credentials.load(), None);
    }
}
