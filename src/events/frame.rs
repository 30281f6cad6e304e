//! Wire frames exchanged over the WebSocket

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::change::ChangeEvent;

/// Fired once the transport is open
pub const CONNECT: &str = "connect";
/// Fired when an open transport is lost or closed; data is `{"reason": ..}`
pub const DISCONNECT: &str = "disconnect";
/// Fired for each failed connection attempt; data is `{"message": ..}`
pub const CONNECT_ERROR: &str = "connect_error";
/// Fired before each retry; data is `{"attempt": n}`
pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
/// Fired once when all retries are used up; data is `{"attempts": n}`
pub const RECONNECT_FAILED: &str = "reconnect_failed";

pub const NEW_CONTENT: &str = "new:content";
pub const UPDATE_CONTENT: &str = "update:content";
pub const DELETE_CONTENT: &str = "delete:content";

/// Content change events the dashboards listen for
pub const CONTENT_EVENTS: [&str; 3] = [NEW_CONTENT, UPDATE_CONTENT, DELETE_CONTENT];

/// Every change event name, content first
pub const CHANGE_EVENTS: [&str; 9] = [
    NEW_CONTENT,
    UPDATE_CONTENT,
    DELETE_CONTENT,
    "new:business",
    "update:business",
    "delete:business",
    "new:user",
    "update:user",
    "delete:user",
];

/// Names generated locally by the connection, never by the server
pub fn is_lifecycle_event(name: &str) -> bool {
    matches!(
        name,
        CONNECT | DISCONNECT | CONNECT_ERROR | RECONNECT_ATTEMPT | RECONNECT_FAILED
    )
}

/// One named event with its JSON payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Frame carrying a change event in wire shape
    pub fn change(event: &ChangeEvent) -> Self {
        let data = serde_json::to_value(event.to_payload()).unwrap_or(Value::Null);
        Self::new(event.event_name(), data)
    }

    pub(crate) fn disconnect(reason: &str) -> Self {
        Self::new(DISCONNECT, json!({ "reason": reason }))
    }

    pub(crate) fn connect_error(message: &str) -> Self {
        Self::new(CONNECT_ERROR, json!({ "message": message }))
    }

    pub(crate) fn reconnect_attempt(attempt: u32) -> Self {
        Self::new(RECONNECT_ATTEMPT, json!({ "attempt": attempt }))
    }

    pub(crate) fn reconnect_failed(attempts: u32) -> Self {
        Self::new(RECONNECT_FAILED, json!({ "attempts": attempts }))
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
