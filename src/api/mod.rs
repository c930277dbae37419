//! REST collaborator: authoritative snapshots and persistence of user actions.
//!
//! Stores talk to the API only through the traits below so tests can swap
//! in an in-memory implementation.

mod client;
mod types;

use async_trait::async_trait;

pub use client::RestClient;
pub(crate) use types::ListEnvelope;
pub use types::{ListingItem, Notification, SavedRecord};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("config error: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("{endpoint} returned status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        Self::Request(value.to_string())
    }
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError>;

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError>;

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError>;

    async fn clear_notifications(&self) -> Result<(), ApiError>;
}

#[async_trait]
pub trait SavedRecordApi: Send + Sync {
    async fn list_saved_records(&self) -> Result<Vec<SavedRecord>, ApiError>;

    /// Acknowledge the latest update of a saved record.
    async fn mark_record_viewed(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
pub trait ListingApi: Send + Sync {
    async fn list_listings(&self) -> Result<Vec<ListingItem>, ApiError>;
}
