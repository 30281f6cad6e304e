//! Event types for real-time content updates
//!
//! - `change`: validated change events and their lenient wire payload
//! - `frame`: the `{ "event", "data" }` envelope and reserved event names

pub mod change;
pub mod frame;

pub use change::{
    event_name, split_event_name, ChangeEvent, ChangeKind, ChangePayload, EntityType,
    UNKNOWN_BUSINESS,
};
pub use frame::{
    is_lifecycle_event, Frame, CHANGE_EVENTS, CONNECT, CONNECT_ERROR, CONTENT_EVENTS,
    DELETE_CONTENT, DISCONNECT, NEW_CONTENT, RECONNECT_ATTEMPT, RECONNECT_FAILED, UPDATE_CONTENT,
};
