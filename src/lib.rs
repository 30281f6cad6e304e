//! Content Sync
//!
//! Real-time synchronization layer for the agency workflow dashboards: one
//! shared WebSocket connection, named-event subscriptions, cache-tag
//! invalidation and transient notices.
//!
//! # Features
//!
//! - **Single connection**: idempotent `connect`, survives view churn
//! - **Reconnect policy**: fixed delay, bounded attempts, terminal state
//! - **Subscriptions**: drop-to-unsubscribe handles, registration order kept
//! - **Cache invalidation**: collection-level tags mark queries stale
//! - **Notices**: severity by change kind, auto-dismiss after a TTL
//!
//! # Modules
//!
//! - `config`: environment-driven settings
//! - `connection`: socket client, transport task, reconnect, credentials
//! - `events`: change events and wire frames
//! - `registry`: named-event handler registry
//! - `cache`: cache tags, query cache and the invalidation dispatcher
//! - `notify`: notices, sinks and the presenter
//! - `sync`: the application-level service wiring it all together
//! - `rest`: typed REST client for contents, businesses and users
//! - `relay`: WebSocket relay that fans change events out to clients
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use content_sync::{
//!     CacheInvalidator, NoticeBoard, NotificationPresenter, QueryCache, SocketClient,
//!     SyncConfig, SyncContext,
//! };
//!
//! #[tokio::main]
//! async fn main() -> content_sync::Result<()> {
//!     let config = SyncConfig::from_env();
//!     let cache = Arc::new(QueryCache::new());
//!     let board = Arc::new(NoticeBoard::new());
//!
//!     let client = Arc::new(SocketClient::new(config.clone())?);
//!     let presenter = Arc::new(NotificationPresenter::with_ttl(board.clone(), config.notice_ttl));
//!     let sync = SyncContext::new(client, CacheInvalidator::new(&cache), presenter);
//!
//!     let connection = sync.init(None);
//!     connection.wait_connected().await?;
//!
//!     let _view = sync.on("update:content", |data| println!("updated: {}", data));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod notify;
pub mod registry;
pub mod relay;
pub mod rest;
pub mod sync;

// Re-export commonly used items at crate root
pub use cache::{CacheInvalidator, CacheTag, InvalidationSink, QueryCache};
pub use config::SyncConfig;
pub use connection::{
    Connection, ConnectionState, CredentialStore, DisconnectReason, ReconnectPolicy, SocketClient,
};
pub use error::{Result, SyncError};
pub use events::{ChangeEvent, ChangeKind, EntityType, Frame};
pub use notify::{LogNotices, Notice, NoticeBoard, NoticeSink, NotificationPresenter, Severity};
pub use registry::{EventRegistry, Subscription};
pub use relay::{spawn_relay, RelayConfig, RelayHandle};
pub use rest::RestClient;
pub use sync::SyncContext;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
