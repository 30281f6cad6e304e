//! Shared relay state

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{broadcast, watch};

use super::auth::{Claims, TokenValidator};
use crate::error::{Result, SyncError};
use crate::events::Frame;

/// Frames buffered per slow client before it starts missing events
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct RelayState {
    event_tx: broadcast::Sender<Frame>,
    published: AtomicU64,
    clients: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
    validator: Option<TokenValidator>,
}

impl RelayState {
    pub fn new(capacity: usize, validator: Option<TokenValidator>) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            event_tx,
            published: AtomicU64::new(0),
            clients: AtomicUsize::new(0),
            shutdown_tx,
            validator,
        }
    }

    /// Send a frame to every connected client; returns how many got it
    pub fn publish(&self, frame: Frame) -> usize {
        self.published.fetch_add(1, Ordering::SeqCst);
        let event = frame.event.clone();
        // No receivers just means nobody is connected
        let delivered = self.event_tx.send(frame).unwrap_or(0);
        tracing::debug!(%event, delivered, "frame published");
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.event_tx.subscribe()
    }

    /// Frames published since start
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub(crate) fn client_connected(&self) {
        self.clients.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn client_disconnected(&self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn requires_auth(&self) -> bool {
        self.validator.is_some()
    }

    /// Check a token when a secret is configured. Without one every caller
    /// is accepted anonymously.
    pub fn authorize(&self, token: Option<&str>) -> Result<Option<Claims>> {
        match (&self.validator, token) {
            (None, _) => Ok(None),
            (Some(_), None) => Err(SyncError::Auth("missing token".to_string())),
            (Some(validator), Some(token)) => validator.validate_authorization(token).map(Some),
        }
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, None)
    }
}

impl std::fmt::Debug for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayState")
            .field("clients", &self.client_count())
            .field("published", &self.published())
            .field("requires_auth", &self.requires_auth())
            .finish()
    }
}
