//! Typed views of inbound realtime payloads.
//!
//! The connection manager only guarantees that a payload is a JSON object.
//! Consumers decode the shape they care about through [`InboundEvent`];
//! unknown extra fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ListingItem;
use crate::bus::{Event, EventName, PayloadError};

/// Something changed server-side; consumers should re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChanged {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPushed {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "text")]
    pub message: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Someone viewed one of the user's CVs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordViewed {
    pub record_id: String,
    #[serde(default)]
    pub viewer_name: Option<String>,
    #[serde(default)]
    pub viewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingAction {
    Added,
    Updated,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingChanged {
    pub action: ListingAction,
    pub item_id: String,
    #[serde(default)]
    pub item: Option<ListingItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingItemViewed {
    pub item_id: String,
    #[serde(default)]
    pub view_count: Option<u64>,
}

/// Someone saved one of the user's CVs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSavedByPeer {
    pub record_id: String,
    #[serde(default)]
    pub saved_by: Option<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// The owner of a CV the user saved has updated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdatedByOwner {
    pub record_id: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One variant per inbound message name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    DataChanged(DataChanged),
    Notification(NotificationPushed),
    RecordViewed(RecordViewed),
    ListingChanged(ListingChanged),
    ListingItemViewed(ListingItemViewed),
    RecordSavedByPeer(RecordSavedByPeer),
    RecordUpdatedByOwner(RecordUpdatedByOwner),
}

impl InboundEvent {
    pub fn from_event(event: &Event) -> Result<Self, PayloadError> {
        Ok(match event.name {
            EventName::DataChanged => Self::DataChanged(event.decode()?),
            EventName::Notification => Self::Notification(event.decode()?),
            EventName::RecordViewed => Self::RecordViewed(event.decode()?),
            EventName::ListingChanged => Self::ListingChanged(event.decode()?),
            EventName::ListingItemViewed => Self::ListingItemViewed(event.decode()?),
            EventName::RecordSavedByPeer => Self::RecordSavedByPeer(event.decode()?),
            EventName::RecordUpdatedByOwner => Self::RecordUpdatedByOwner(event.decode()?),
        })
    }

    pub fn name(&self) -> EventName {
        match self {
            Self::DataChanged(_) => EventName::DataChanged,
            Self::Notification(_) => EventName::Notification,
            Self::RecordViewed(_) => EventName::RecordViewed,
            Self::ListingChanged(_) => EventName::ListingChanged,
            Self::ListingItemViewed(_) => EventName::ListingItemViewed,
            Self::RecordSavedByPeer(_) => EventName::RecordSavedByPeer,
            Self::RecordUpdatedByOwner(_) => EventName::RecordUpdatedByOwner,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(name: EventName, value: serde_json::Value) -> Event {
        Event::from_value(name, value).expect("object payload")
    }

    #[test]
    fn decodes_record_update_with_extra_fields() {
        let inbound = InboundEvent::from_event(&event(
            EventName::RecordUpdatedByOwner,
            json!({
                "recordId": "cv42",
                "updatedAt": "2024-03-01T10:00:00Z",
                "ownerAvatar": "ignored.png"
            }),
        ))
        .expect("valid payload");

        match inbound {
            InboundEvent::RecordUpdatedByOwner(update) => {
                assert_eq!(update.record_id, "cv42");
                assert!(update.updated_at.is_some());
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn decodes_listing_change_with_item() {
        let inbound = InboundEvent::from_event(&event(
            EventName::ListingChanged,
            json!({
                "action": "added",
                "itemId": "l1",
                "item": { "id": "l1", "title": "Backend CV", "updatedAt": "2024-03-01T10:00:00Z" }
            }),
        ))
        .expect("valid payload");

        assert_eq!(inbound.name(), EventName::ListingChanged);
        let InboundEvent::ListingChanged(change) = inbound else {
            panic!("expected listing change");
        };
        assert_eq!(change.action, ListingAction::Added);
        assert_eq!(change.item.map(|i| i.title), Some("Backend CV".to_string()));
    }

    #[test]
    fn missing_required_field_is_a_shape_error() {
        let err = InboundEvent::from_event(&event(EventName::RecordViewed, json!({ "viewer": "x" })))
            .expect_err("recordId is required");
        assert!(matches!(err, PayloadError::Shape { .. }));
    }

    #[test]
    fn data_changed_accepts_empty_object() {
        let inbound = InboundEvent::from_event(&event(EventName::DataChanged, json!({})))
            .expect("empty object is fine");
        assert_eq!(inbound, InboundEvent::DataChanged(DataChanged::default()));
    }
}
