//! Event name vocabulary and the transient event record.
//!
//! Single source of truth for the wire names the realtime server pushes and
//! the names the client emits.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound names
// ---------------------------------------------------------------------------

pub const EVENT_DATA_CHANGED: &str = "data-changed";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_RECORD_VIEWED: &str = "record-viewed";
pub const EVENT_LISTING_CHANGED: &str = "listing-changed";
pub const EVENT_LISTING_ITEM_VIEWED: &str = "listing-item-viewed";
pub const EVENT_RECORD_SAVED_BY_PEER: &str = "record-saved-by-peer";
pub const EVENT_RECORD_UPDATED_BY_OWNER: &str = "record-updated-by-owner";

// ---------------------------------------------------------------------------
// Control and outbound names
// ---------------------------------------------------------------------------

/// First frame of every connection, carrying the server-issued session id.
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_AUTHENTICATE: &str = "authenticate";
pub const EVENT_USER_ACTIVITY: &str = "user-activity";

/// Inbound message names forwarded onto the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    DataChanged,
    Notification,
    RecordViewed,
    ListingChanged,
    ListingItemViewed,
    RecordSavedByPeer,
    RecordUpdatedByOwner,
}

impl EventName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DataChanged => EVENT_DATA_CHANGED,
            Self::Notification => EVENT_NOTIFICATION,
            Self::RecordViewed => EVENT_RECORD_VIEWED,
            Self::ListingChanged => EVENT_LISTING_CHANGED,
            Self::ListingItemViewed => EVENT_LISTING_ITEM_VIEWED,
            Self::RecordSavedByPeer => EVENT_RECORD_SAVED_BY_PEER,
            Self::RecordUpdatedByOwner => EVENT_RECORD_UPDATED_BY_OWNER,
        }
    }

    pub const fn all() -> &'static [EventName] {
        &[
            EventName::DataChanged,
            EventName::Notification,
            EventName::RecordViewed,
            EventName::ListingChanged,
            EventName::ListingItemViewed,
            EventName::RecordSavedByPeer,
            EventName::RecordUpdatedByOwner,
        ]
    }

    /// Map a wire name onto the vocabulary. Unknown names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == name)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured payload of an inbound event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload for '{name}' must be a JSON object, got {kind}")]
    NotAnObject { name: EventName, kind: &'static str },
    #[error("payload for '{name}' does not match the expected shape: {source}")]
    Shape {
        name: EventName,
        #[source]
        source: serde_json::Error,
    },
}

/// One pushed event. Lives for a single dispatch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: EventName,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: EventName, payload: Payload) -> Self {
        Self {
            name,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Validate a raw wire value. Anything but a JSON object is rejected.
    pub fn from_value(name: EventName, value: serde_json::Value) -> Result<Self, PayloadError> {
        match value {
            serde_json::Value::Object(payload) => Ok(Self::new(name, payload)),
            other => Err(PayloadError::NotAnObject {
                name,
                kind: json_kind(&other),
            }),
        }
    }

    /// Decode the payload into a typed view.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_value(serde_json::Value::Object(self.payload.clone())).map_err(|source| {
            PayloadError::Shape {
                name: self.name,
                source,
            }
        })
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
