//! Transient user notices for change events
//!
//! [`NotificationPresenter`] classifies a change event and hands a [`Notice`]
//! to a [`NoticeSink`]. The hand-off never blocks: sinks only append to
//! memory or write a log line.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::DEFAULT_NOTICE_TTL;
use crate::events::{ChangeEvent, ChangeKind};

/// Notices kept by a [`NoticeBoard`] before the oldest is evicted
pub const DEFAULT_BOARD_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
}

impl Severity {
    pub fn for_kind(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::New => Severity::Success,
            ChangeKind::Update => Severity::Info,
            ChangeKind::Delete => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auto-dismissing message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(with = "ttl_millis")]
    pub ttl: Duration,
}

impl Notice {
    /// Whether the notice should no longer be shown at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self.created_at + ttl <= now,
            Err(_) => false,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.title, self.message)
    }
}

mod ttl_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_millis() as u64)
    }
}

/// Destination for notices
pub trait NoticeSink: Send + Sync {
    fn push(&self, notice: Notice);
}

/// Bounded in-memory list of notices, pruned by TTL on read
#[derive(Debug)]
pub struct NoticeBoard {
    notices: Mutex<VecDeque<Notice>>,
    capacity: usize,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BOARD_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            notices: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Notices still visible now
    pub fn active(&self) -> Vec<Notice> {
        self.active_at(Utc::now())
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Notice> {
        let mut notices = self.notices.lock();
        notices.retain(|n| !n.is_expired_at(now));
        notices.iter().cloned().collect()
    }

    /// Every notice ever pushed and not yet evicted, expired or not
    pub fn history(&self) -> Vec<Notice> {
        self.notices.lock().iter().cloned().collect()
    }

    /// Dismiss one notice early
    pub fn dismiss(&self, id: u64) -> bool {
        let mut notices = self.notices.lock();
        let before = notices.len();
        notices.retain(|n| n.id != id);
        notices.len() != before
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeSink for NoticeBoard {
    fn push(&self, notice: Notice) {
        let mut notices = self.notices.lock();
        let now = Utc::now();
        notices.retain(|n| !n.is_expired_at(now));
        while notices.len() >= self.capacity {
            notices.pop_front();
        }
        notices.push_back(notice);
    }
}

/// Writes notices as log lines; used by the headless binary
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotices;

impl NoticeSink for LogNotices {
    fn push(&self, notice: Notice) {
        match notice.severity {
            Severity::Warning => tracing::warn!(
                id = notice.id,
                actor = notice.actor.as_deref(),
                "{}: {}",
                notice.title,
                notice.message
            ),
            _ => tracing::info!(
                id = notice.id,
                severity = %notice.severity,
                actor = notice.actor.as_deref(),
                "{}: {}",
                notice.title,
                notice.message
            ),
        }
    }
}

/// Turns change events and terminal connectivity changes into notices
pub struct NotificationPresenter {
    sink: Arc<dyn NoticeSink>,
    ttl: Duration,
    next_id: AtomicU64,
}

impl NotificationPresenter {
    pub fn new(sink: Arc<dyn NoticeSink>) -> Self {
        Self::with_ttl(sink, DEFAULT_NOTICE_TTL)
    }

    pub fn with_ttl(sink: Arc<dyn NoticeSink>, ttl: Duration) -> Self {
        Self {
            sink,
            ttl,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Show a notice for a change event; returns what was shown
    pub fn present(&self, event: &ChangeEvent) -> Notice {
        let title = match event.kind {
            ChangeKind::New => format!("New {}", event.entity.as_str()),
            ChangeKind::Update => format!("{} updated", event.entity.label()),
            ChangeKind::Delete => format!("{} deleted", event.entity.label()),
        };
        let message = format!("{}: {}", event.business_label, event.message);
        self.publish(Severity::for_kind(event.kind), title, message, event.actor_id.clone())
    }

    /// Live updates came back after at least one retry
    pub fn connection_restored(&self, attempts: u32) -> Notice {
        self.publish(
            Severity::Success,
            "Live updates restored".to_string(),
            format!("Reconnected after {} attempt(s)", attempts),
            None,
        )
    }

    /// Every retry failed; data on screen is no longer live
    pub fn connection_failed(&self, attempts: u32) -> Notice {
        self.publish(
            Severity::Warning,
            "Live updates unavailable".to_string(),
            format!(
                "Could not reconnect after {} attempt(s); showing last loaded data",
                attempts
            ),
            None,
        )
    }

    fn publish(
        &self,
        severity: Severity,
        title: String,
        message: String,
        actor: Option<String>,
    ) -> Notice {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            severity,
            title,
            message,
            actor,
            created_at: Utc::now(),
            ttl: self.ttl,
        };
        self.sink.push(notice.clone());
        notice
    }
}

impl fmt::Debug for NotificationPresenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationPresenter")
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EntityType;

    fn presenter() -> (Arc<NoticeBoard>, NotificationPresenter) {
        let board = Arc::new(NoticeBoard::new());
        let presenter = NotificationPresenter::new(board.clone());
        (board, presenter)
    }

    #[test]
    fn test_severity_by_kind() {
        assert_eq!(Severity::for_kind(ChangeKind::New), Severity::Success);
        assert_eq!(Severity::for_kind(ChangeKind::Update), Severity::Info);
        assert_eq!(Severity::for_kind(ChangeKind::Delete), Severity::Warning);
    }

    #[test]
    fn test_present_new_content() {
        let (board, presenter) = presenter();
        let event = ChangeEvent::new(ChangeKind::New, EntityType::Content, "Acme")
            .with_message("poster assigned")
            .with_actor("u-1");

        let notice = presenter.present(&event);
        assert_eq!(notice.severity, Severity::Success);
        assert_eq!(notice.title, "New content");
        assert_eq!(notice.message, "Acme: poster assigned");
        assert_eq!(notice.actor.as_deref(), Some("u-1"));
        assert_eq!(notice.ttl, DEFAULT_NOTICE_TTL);
        assert_eq!(board.active(), vec![notice]);
    }

    #[test]
    fn test_present_tolerates_missing_fields() {
        let (_board, presenter) = presenter();
        let event = ChangeEvent::parse("delete:content", &serde_json::Value::Null).unwrap();
        let notice = presenter.present(&event);
        assert_eq!(notice.severity, Severity::Warning);
        assert_eq!(notice.title, "Content deleted");
        assert_eq!(notice.message, "Unknown business: Content deleted");
        assert!(notice.actor.is_none());
    }

    #[test]
    fn test_board_expires_by_ttl() {
        let board = Arc::new(NoticeBoard::new());
        let presenter = NotificationPresenter::with_ttl(board.clone(), Duration::from_secs(4));
        let notice = presenter.present(&ChangeEvent::new(
            ChangeKind::Update,
            EntityType::Business,
            "Acme",
        ));

        let soon = notice.created_at + chrono::Duration::seconds(3);
        let later = notice.created_at + chrono::Duration::seconds(5);
        assert_eq!(board.active_at(soon).len(), 1);
        assert!(board.active_at(later).is_empty());
        assert!(board.is_empty());
    }

    #[test]
    fn test_board_capacity_and_dismiss() {
        let board = Arc::new(NoticeBoard::with_capacity(2));
        let presenter = NotificationPresenter::new(board.clone());
        let event = ChangeEvent::new(ChangeKind::New, EntityType::User, "Acme");
        let first = presenter.present(&event);
        let second = presenter.present(&event);
        let third = presenter.present(&event);

        let ids: Vec<u64> = board.history().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![second.id, third.id]);
        assert!(!board.dismiss(first.id));
        assert!(board.dismiss(second.id));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_connectivity_notices() {
        let (board, presenter) = presenter();
        let failed = presenter.connection_failed(5);
        assert_eq!(failed.severity, Severity::Warning);
        assert!(failed.message.contains("5 attempt"));
        let restored = presenter.connection_restored(2);
        assert_eq!(restored.severity, Severity::Success);
        assert_eq!(board.len(), 2);
    }

    #[test]
    fn test_notice_serializes_ttl_as_millis() {
        let (_board, presenter) = presenter();
        let notice = presenter.present(&ChangeEvent::new(ChangeKind::New, EntityType::Content, "Acme"));
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["ttl"], 4000);
        assert_eq!(json["severity"], "success");
    }
}
