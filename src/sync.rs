//! Application-level sync service
//!
//! [`SyncContext`] is the one place that connects the socket and wires change
//! events to cache invalidation and notices. Views subscribe through it but
//! never own the connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheInvalidator;
use crate::connection::{Connection, SocketClient};
use crate::events::{
    ChangeEvent, CHANGE_EVENTS, CONNECT, CONNECT_ERROR, DISCONNECT, RECONNECT_ATTEMPT,
    RECONNECT_FAILED,
};
use crate::notify::NotificationPresenter;
use crate::registry::Subscription;

/// Entries kept by the activity log
pub const ACTIVITY_LOG_LEN: usize = 10;

/// One line of connection activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub at: DateTime<Utc>,
    pub event: String,
    pub detail: String,
}

/// Rolling log of recent connection and change events, for status panels
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<Activity>>,
}

impl ActivityLog {
    pub fn record(&self, event: &str, detail: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() >= ACTIVITY_LOG_LEN {
            entries.pop_front();
        }
        entries.push_back(Activity {
            at: Utc::now(),
            event: event.to_string(),
            detail: detail.into(),
        });
    }

    pub fn entries(&self) -> Vec<Activity> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

struct Wiring {
    connection_id: u64,
    _subscriptions: Vec<Subscription>,
}

/// Shared sync service with explicit `init` / `teardown`
pub struct SyncContext {
    client: Arc<SocketClient>,
    invalidator: CacheInvalidator,
    presenter: Arc<NotificationPresenter>,
    activity: Arc<ActivityLog>,
    wiring: Mutex<Option<Wiring>>,
}

impl SyncContext {
    pub fn new(
        client: Arc<SocketClient>,
        invalidator: CacheInvalidator,
        presenter: Arc<NotificationPresenter>,
    ) -> Self {
        Self {
            client,
            invalidator,
            presenter,
            activity: Arc::new(ActivityLog::default()),
            wiring: Mutex::new(None),
        }
    }

    /// Connect (idempotently) and wire change events once per connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(&self, credential: Option<&str>) -> Connection {
        let conn = self.client.connect(credential);
        let mut wiring = self.wiring.lock();
        if wiring
            .as_ref()
            .is_some_and(|w| w.connection_id == conn.id())
        {
            return conn;
        }

        let mut subscriptions = Vec::with_capacity(CHANGE_EVENTS.len() + 5);
        for name in CHANGE_EVENTS {
            let invalidator = self.invalidator.clone();
            let presenter = self.presenter.clone();
            let activity = self.activity.clone();
            subscriptions.push(conn.on(name, move |payload: &Value| {
                let Some(event) = ChangeEvent::parse(name, payload) else {
                    return;
                };
                activity.record(name, event.business_label.clone());
                invalidator.dispatch(&event);
                presenter.present(&event);
            }));
        }
        subscriptions.extend(self.wire_lifecycle(&conn));

        tracing::info!(connection = conn.id(), "sync context wired");
        *wiring = Some(Wiring {
            connection_id: conn.id(),
            _subscriptions: subscriptions,
        });
        conn
    }

    fn wire_lifecycle(&self, conn: &Connection) -> Vec<Subscription> {
        let retries = Arc::new(AtomicU32::new(0));
        let mut subs = Vec::with_capacity(5);

        {
            let activity = self.activity.clone();
            let presenter = self.presenter.clone();
            let retries = retries.clone();
            subs.push(conn.on(CONNECT, move |_| {
                activity.record(CONNECT, "connected");
                let attempts = retries.swap(0, Ordering::SeqCst);
                if attempts > 0 {
                    presenter.connection_restored(attempts);
                }
            }));
        }
        {
            let activity = self.activity.clone();
            subs.push(conn.on(DISCONNECT, move |data| {
                activity.record(DISCONNECT, field(data, "reason"));
            }));
        }
        {
            let activity = self.activity.clone();
            subs.push(conn.on(CONNECT_ERROR, move |data| {
                activity.record(CONNECT_ERROR, field(data, "message"));
            }));
        }
        {
            let activity = self.activity.clone();
            subs.push(conn.on(RECONNECT_ATTEMPT, move |data| {
                let attempt = data.get("attempt").and_then(Value::as_u64).unwrap_or(0);
                retries.store(attempt as u32, Ordering::SeqCst);
                activity.record(RECONNECT_ATTEMPT, format!("attempt {}", attempt));
            }));
        }
        {
            let activity = self.activity.clone();
            let presenter = self.presenter.clone();
            subs.push(conn.on(RECONNECT_FAILED, move |data| {
                let attempts = data.get("attempts").and_then(Value::as_u64).unwrap_or(0) as u32;
                activity.record(RECONNECT_FAILED, format!("{} attempts", attempts));
                presenter.connection_failed(attempts);
            }));
        }
        subs
    }

    /// Drop the wiring and close the connection (logout)
    pub fn teardown(&self) {
        if let Some(wiring) = self.wiring.lock().take() {
            tracing::info!(connection = wiring.connection_id, "sync context torn down");
        }
        self.client.disconnect();
    }

    /// View-level subscription through the shared client
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.client.on(event, handler)
    }

    pub fn client(&self) -> &Arc<SocketClient> {
        &self.client
    }

    pub fn connection(&self) -> Option<Connection> {
        self.client.connection()
    }

    pub fn presenter(&self) -> &Arc<NotificationPresenter> {
        &self.presenter
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    /// Whether change events are wired for the current connection
    pub fn is_wired(&self) -> bool {
        let current = self.client.connection().map(|c| c.id());
        self.wiring
            .lock()
            .as_ref()
            .is_some_and(|w| Some(w.connection_id) == current)
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("client", &self.client)
            .field("invalidator", &self.invalidator)
            .field("wired", &self.is_wired())
            .finish()
    }
}

fn field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTag, QueryCache};
    use crate::config::SyncConfig;
    use crate::connection::ReconnectPolicy;
    use crate::notify::{NoticeBoard, Severity};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        ctx: SyncContext,
        cache: Arc<QueryCache>,
        board: Arc<NoticeBoard>,
    }

    fn harness() -> Harness {
        let config = SyncConfig::new("http://127.0.0.1:9/api/v1")
            .with_reconnect(ReconnectPolicy::new(Duration::from_secs(60), 1))
            .with_connect_timeout(Duration::from_millis(200));
        let client = Arc::new(SocketClient::new(config).unwrap());
        let cache = Arc::new(QueryCache::new());
        let board = Arc::new(NoticeBoard::new());
        let presenter = Arc::new(NotificationPresenter::new(board.clone()));
        let ctx = SyncContext::new(client, CacheInvalidator::new(&cache), presenter);
        Harness { ctx, cache, board }
    }

    #[tokio::test]
    async fn test_init_wires_once_per_connection() {
        let h = harness();
        let first = h.ctx.init(None);
        let second = h.ctx.init(None);
        assert_eq!(first.id(), second.id());
        assert!(h.ctx.is_wired());
        assert_eq!(first.registry().handler_count("new:content"), 1);

        first
            .registry()
            .dispatch("new:content", &json!({"business": "Acme", "message": "poster assigned"}));
        assert_eq!(h.cache.invalidations(CacheTag::Content), 1);

        let notices = h.board.active();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Success);
        assert!(notices[0].message.contains("Acme"));
        h.ctx.teardown();
    }

    #[tokio::test]
    async fn test_view_subscriptions_do_not_add_invalidations() {
        let h = harness();
        let conn = h.ctx.init(None);
        let _view_a = h.ctx.on("update:content", |_| {});
        let _view_b = h.ctx.on("update:content", |_| {});

        conn.registry().dispatch("update:content", &json!({}));
        assert_eq!(h.cache.invalidations(CacheTag::Content), 1);
        assert_eq!(conn.registry().handler_count("update:content"), 1);
        assert_eq!(h.ctx.client().views().handler_count("update:content"), 2);
        h.ctx.teardown();
    }

    #[tokio::test]
    async fn test_teardown_removes_wiring() {
        let h = harness();
        let conn = h.ctx.init(None);
        h.ctx.teardown();
        assert!(!h.ctx.is_wired());
        assert!(h.ctx.connection().is_none());
        assert_eq!(conn.registry().handler_count("new:content"), 0);
    }

    #[tokio::test]
    async fn test_terminal_failure_notice_and_activity() {
        let h = harness();
        let conn = h.ctx.init(None);
        conn.registry().dispatch(RECONNECT_ATTEMPT, &json!({"attempt": 1}));
        conn.registry().dispatch(CONNECT_ERROR, &json!({"message": "refused"}));
        assert!(h.board.is_empty());

        conn.registry().dispatch(RECONNECT_FAILED, &json!({"attempts": 1}));
        let notices = h.board.active();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Warning);

        let events: Vec<String> = h.ctx.activity().entries().into_iter().map(|a| a.event).collect();
        assert!(events.ends_with(&[
            RECONNECT_ATTEMPT.to_string(),
            CONNECT_ERROR.to_string(),
            RECONNECT_FAILED.to_string()
        ]));
        h.ctx.teardown();
    }

    #[test]
    fn test_activity_log_is_bounded() {
        let log = ActivityLog::default();
        for i in 0..15 {
            log.record("connect", i.to_string());
        }
        let entries = log.entries();
        assert_eq!(entries.len(), ACTIVITY_LOG_LEN);
        assert_eq!(entries[0].detail, "5");
    }
}
