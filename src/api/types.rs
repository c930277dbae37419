use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub link: Option<String>,
}

/// A CV the current user has saved, as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub has_unseen_update: bool,
}

/// An entry of the public listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub view_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// List endpoints answer either with a bare array or `{ "items": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ListEnvelope<T> {
    Bare(Vec<T>),
    Wrapped { items: Vec<T> },
}

impl<T> ListEnvelope<T> {
    pub(crate) fn into_items(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}
