//! Change events pushed by the server when a record is created, updated or deleted

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Business label used when the payload does not name one
pub const UNKNOWN_BUSINESS: &str = "Unknown business";

/// What happened to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ChangeKind::New),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            _ => Err(()),
        }
    }
}

/// Which collection the changed record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Content,
    Business,
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Content => "content",
            EntityType::Business => "business",
            EntityType::User => "user",
        }
    }

    /// Noun used in notices ("Content", "Business", "User")
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Content => "Content",
            EntityType::Business => "Business",
            EntityType::User => "User",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(EntityType::Content),
            "business" => Ok(EntityType::Business),
            "user" => Ok(EntityType::User),
            _ => Err(()),
        }
    }
}

/// Payload as the server sends it. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl ChangePayload {
    /// Lenient decode: anything that is not an object yields an empty payload,
    /// and fields of the wrong JSON type are ignored individually.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            subtype: text("type"),
            business: text("business"),
            message: text("message"),
            added_by: text("addedBy"),
            updated_by: text("updatedBy"),
            deleted_by: text("deletedBy"),
        }
    }
}

/// A validated change notification.
///
/// Only exists for the duration of one invalidation/notice cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: EntityType,
    pub business_label: String,
    pub message: String,
    pub actor_id: Option<String>,
    pub subtype: Option<String>,
}

impl ChangeEvent {
    /// Build an event with a generic message
    pub fn new(kind: ChangeKind, entity: EntityType, business_label: impl Into<String>) -> Self {
        Self {
            kind,
            entity,
            business_label: business_label.into(),
            message: generic_message(kind, entity),
            actor_id: None,
            subtype: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Apply boundary defaults to a raw payload
    pub fn from_payload(kind: ChangeKind, entity: EntityType, payload: ChangePayload) -> Self {
        let own_actor = match kind {
            ChangeKind::New => payload.added_by.clone(),
            ChangeKind::Update => payload.updated_by.clone(),
            ChangeKind::Delete => payload.deleted_by.clone(),
        };
        let actor_id = own_actor
            .or(payload.added_by)
            .or(payload.updated_by)
            .or(payload.deleted_by);

        Self {
            kind,
            entity,
            business_label: payload
                .business
                .unwrap_or_else(|| UNKNOWN_BUSINESS.to_string()),
            message: payload
                .message
                .unwrap_or_else(|| generic_message(kind, entity)),
            actor_id,
            subtype: payload.subtype,
        }
    }

    /// Parse a named server event. Returns `None` when the name is not a
    /// change event; a malformed payload still yields an event with defaults.
    pub fn parse(event_name: &str, payload: &Value) -> Option<Self> {
        let (kind, entity) = split_event_name(event_name)?;
        Some(Self::from_payload(kind, entity, ChangePayload::from_value(payload)))
    }

    /// Wire name, e.g. `new:content`
    pub fn event_name(&self) -> String {
        event_name(self.kind, self.entity)
    }

    /// Payload in wire shape; the actor lands in the field matching the kind
    pub fn to_payload(&self) -> ChangePayload {
        let mut payload = ChangePayload {
            subtype: self.subtype.clone(),
            business: Some(self.business_label.clone()),
            message: Some(self.message.clone()),
            ..Default::default()
        };
        let actor = self.actor_id.clone();
        match self.kind {
            ChangeKind::New => payload.added_by = actor,
            ChangeKind::Update => payload.updated_by = actor,
            ChangeKind::Delete => payload.deleted_by = actor,
        }
        payload
    }
}

/// `<kind>:<entity>`
pub fn event_name(kind: ChangeKind, entity: EntityType) -> String {
    format!("{}:{}", kind.as_str(), entity.as_str())
}

/// Inverse of [`event_name`]
pub fn split_event_name(name: &str) -> Option<(ChangeKind, EntityType)> {
    let (kind, entity) = name.split_once(':')?;
    Some((kind.parse().ok()?, entity.parse().ok()?))
}

fn generic_message(kind: ChangeKind, entity: EntityType) -> String {
    let verb = match kind {
        ChangeKind::New => "created",
        ChangeKind::Update => "updated",
        ChangeKind::Delete => "deleted",
    };
    format!("{} {}", entity.label(), verb)
}
