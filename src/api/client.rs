use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    ApiError, ListEnvelope, ListingApi, ListingItem, Notification, NotificationApi, SavedRecord,
    SavedRecordApi,
};
use crate::config::SyncConfig;

/// HTTP implementation of the API traits. Authenticates with the session
/// cookie shared with the realtime channel.
pub struct RestClient {
    base_url: String,
    cookie: Option<String>,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::Config("api base url cannot be empty".to_string()));
        }
        if timeout.is_zero() {
            return Err(ApiError::Config(
                "api timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            cookie,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|error| ApiError::Config(error.to_string()))?,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ApiError> {
        Self::new(
            config.api_url.clone(),
            config.session_cookie.clone(),
            config.request_timeout(),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.endpoint(path));
        match &self.cookie {
            Some(cookie) => request.header(reqwest::header::COOKIE, cookie),
            None => request,
        }
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let response = self.request(Method::GET, path).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: ListEnvelope<T> = response.json().await.map_err(|error| {
            ApiError::InvalidResponse(format!("failed to parse {path} response: {error}"))
        })?;
        let items = envelope.into_items();
        debug!(endpoint = path, count = items.len(), "fetched list");
        Ok(items)
    }

    async fn execute(&self, method: Method, path: &str) -> Result<(), ApiError> {
        let response = self.request(method.clone(), path).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        debug!(%method, endpoint = path, "request accepted");
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for RestClient {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.get_list("/notifications").await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/notifications/{}/read", urlencoding::encode(id));
        self.execute(Method::PATCH, &path).await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.execute(Method::PATCH, "/notifications/read-all").await
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/notifications/{}", urlencoding::encode(id));
        self.execute(Method::DELETE, &path).await
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.execute(Method::DELETE, "/notifications").await
    }
}

#[async_trait]
impl SavedRecordApi for RestClient {
    async fn list_saved_records(&self) -> Result<Vec<SavedRecord>, ApiError> {
        self.get_list("/saved-records").await
    }

    async fn mark_record_viewed(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/saved-records/{}/viewed", urlencoding::encode(id));
        self.execute(Method::POST, &path).await
    }
}

#[async_trait]
impl ListingApi for RestClient {
    async fn list_listings(&self) -> Result<Vec<ListingItem>, ApiError> {
        self.get_list("/listings").await
    }
}
