//! Notifications and transient toasts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::{Fetcher, Phase, Reconcile, StoreCore, StoreError};
use crate::api::{Notification, NotificationApi};
use crate::bus::{CallbackError, Event, EventBus, EventName};
use crate::realtime::InboundEvent;

/// Toasts kept before the oldest one is dropped.
pub const MAX_TOASTS: usize = 20;

/// A short-lived popup for a pushed event. `key` identifies the event so the
/// same push delivered twice yields one toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub key: String,
    pub event: EventName,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NotificationState {
    /// Newest first.
    items: Vec<Notification>,
    toasts: Vec<Toast>,
    /// Ids the user marked read, with the watermark of the action.
    /// Snapshots cannot flip them back.
    read_ids: HashMap<String, u64>,
    /// Ids the user deleted, with the watermark of the action. Snapshots
    /// cannot bring them back.
    deleted_ids: HashMap<String, u64>,
    /// Pushed notifications keyed by id, with the watermark of their push.
    pushed: HashMap<String, u64>,
}

impl NotificationState {
    fn push_toast(&mut self, toast: Toast) {
        if self.toasts.iter().any(|t| t.key == toast.key) {
            debug!(key = %toast.key, "duplicate toast ignored");
            return;
        }
        self.toasts.push(toast);
        if self.toasts.len() > MAX_TOASTS {
            let excess = self.toasts.len() - MAX_TOASTS;
            self.toasts.drain(..excess);
        }
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.items.iter_mut().find(|n| n.id == id)
    }
}

fn actor(name: Option<&str>) -> &str {
    name.filter(|n| !n.trim().is_empty()).unwrap_or("Someone")
}

impl Reconcile for NotificationState {
    type Snapshot = Vec<Notification>;

    fn interests() -> &'static [EventName] {
        &[
            EventName::Notification,
            EventName::RecordSavedByPeer,
            EventName::RecordViewed,
        ]
    }

    fn apply_event(&mut self, event: &Event, watermark: u64) -> Result<(), CallbackError> {
        match InboundEvent::from_event(event)? {
            InboundEvent::Notification(pushed) => {
                let created_at = pushed.created_at.unwrap_or(event.received_at);
                let key = match &pushed.id {
                    Some(id) => format!("notification:{id}"),
                    None => format!("notification:{}:{}", pushed.message, created_at.timestamp_millis()),
                };
                self.push_toast(Toast {
                    key,
                    event: event.name,
                    message: pushed.message.clone(),
                    received_at: event.received_at,
                });

                let Some(id) = pushed.id else {
                    return Ok(());
                };
                if self.deleted_ids.contains_key(&id) || self.items.iter().any(|n| n.id == id) {
                    return Ok(());
                }
                self.pushed.insert(id.clone(), watermark);
                self.items.push(Notification {
                    read: self.read_ids.contains_key(&id),
                    id,
                    message: pushed.message,
                    kind: pushed.kind,
                    created_at,
                    link: pushed.link,
                });
                self.sort();
            }
            InboundEvent::RecordSavedByPeer(saved) => {
                let who = actor(saved.saved_by.as_deref());
                let at = saved.saved_at.map(|t| t.timestamp_millis()).unwrap_or_default();
                self.push_toast(Toast {
                    key: format!("saved:{}:{who}:{at}", saved.record_id),
                    event: event.name,
                    message: format!("{who} saved your CV"),
                    received_at: event.received_at,
                });
            }
            InboundEvent::RecordViewed(viewed) => {
                let who = actor(viewed.viewer_name.as_deref());
                let at = viewed.viewed_at.map(|t| t.timestamp_millis()).unwrap_or_default();
                self.push_toast(Toast {
                    key: format!("viewed:{}:{who}:{at}", viewed.record_id),
                    event: event.name,
                    message: format!("{who} viewed your CV"),
                    received_at: event.received_at,
                });
            }
            other => debug!(event = %other.name(), "notification store ignores event"),
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Vec<Notification>, seq: u64) {
        // A snapshot requested after an action that no longer lists the id
        // means the server forgot it for good.
        let listed: HashSet<&str> = snapshot.iter().map(|n| n.id.as_str()).collect();
        self.read_ids
            .retain(|id, watermark| seq <= *watermark || listed.contains(id.as_str()));
        self.deleted_ids
            .retain(|id, watermark| seq <= *watermark || listed.contains(id.as_str()));

        let mut next: Vec<Notification> = snapshot
            .into_iter()
            .filter(|n| !self.deleted_ids.contains_key(&n.id))
            .map(|mut n| {
                n.read |= self.read_ids.contains_key(&n.id);
                n
            })
            .collect();

        // Pushes newer than this snapshot stay until a later fetch covers them.
        self.pushed.retain(|_, watermark| seq <= *watermark);
        for id in self.pushed.keys() {
            if next.iter().any(|n| &n.id == id) {
                continue;
            }
            if let Some(local) = self.items.iter().find(|n| &n.id == id) {
                next.push(local.clone());
            }
        }

        self.items = next;
        self.sort();
    }
}

/// Notifications for the signed-in user plus toasts for live activity.
pub struct NotificationStore {
    core: StoreCore<NotificationState>,
    api: Arc<dyn NotificationApi>,
}

impl NotificationStore {
    pub async fn mount(bus: Arc<EventBus>, api: Arc<dyn NotificationApi>) -> Self {
        let source = Arc::clone(&api);
        let fetcher: Fetcher<Vec<Notification>> = Arc::new(move || {
            let api = Arc::clone(&source);
            Box::pin(async move { api.list_notifications().await })
        });
        let core = StoreCore::mount("notifications", NotificationState::default(), bus, fetcher).await;
        Self { core, api }
    }

    pub fn unmount(&self) {
        self.core.unmount();
    }

    pub async fn refresh(&self) {
        self.core.refresh().await;
    }

    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.last_error()
    }

    /// Revision counter bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.core.changes()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.core.read(|state| state.items.clone())
    }

    pub fn unread_count(&self) -> usize {
        self.core.read(|state| state.items.iter().filter(|n| !n.read).count())
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.core.read(|state| state.toasts.clone())
    }

    /// Local only; returns whether a toast was removed.
    pub fn dismiss_toast(&self, key: &str) -> bool {
        self.core.mutate(|state| {
            let before = state.toasts.len();
            state.toasts.retain(|t| t.key != key);
            state.toasts.len() != before
        })
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), StoreError> {
        self.core
            .optimistic(
                "mark read",
                |state, issued| {
                    let was_remembered = state.read_ids.contains_key(id);
                    let Some(item) = state.find_mut(id) else {
                        return Err(StoreError::NotFound {
                            kind: "notification",
                            id: id.to_string(),
                        });
                    };
                    let was_read = std::mem::replace(&mut item.read, true);
                    state.read_ids.insert(id.to_string(), issued);
                    Ok((was_read, was_remembered))
                },
                self.api.mark_notification_read(id),
                |state, (was_read, was_remembered)| {
                    if let Some(item) = state.find_mut(id) {
                        item.read = was_read;
                    }
                    if !was_remembered {
                        state.read_ids.remove(id);
                    }
                },
            )
            .await
    }

    pub async fn mark_all_read(&self) -> Result<(), StoreError> {
        self.core
            .optimistic(
                "mark all read",
                |state, issued| {
                    let mut flipped = Vec::new();
                    for item in state.items.iter_mut().filter(|n| !n.read) {
                        item.read = true;
                        flipped.push(item.id.clone());
                    }
                    let newly_remembered: Vec<String> = flipped
                        .iter()
                        .filter(|id| state.read_ids.insert((*id).clone(), issued).is_none())
                        .cloned()
                        .collect();
                    Ok((flipped, newly_remembered))
                },
                self.api.mark_all_notifications_read(),
                |state, (flipped, newly_remembered)| {
                    for id in &flipped {
                        if let Some(item) = state.find_mut(id) {
                            item.read = false;
                        }
                    }
                    for id in &newly_remembered {
                        state.read_ids.remove(id);
                    }
                },
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.core
            .optimistic(
                "delete notification",
                |state, issued| {
                    let Some(index) = state.items.iter().position(|n| n.id == id) else {
                        return Err(StoreError::NotFound {
                            kind: "notification",
                            id: id.to_string(),
                        });
                    };
                    let removed = state.items.remove(index);
                    state.deleted_ids.insert(id.to_string(), issued);
                    Ok(removed)
                },
                self.api.delete_notification(id),
                |state, removed| {
                    state.deleted_ids.remove(id);
                    if !state.items.iter().any(|n| n.id == removed.id) {
                        state.items.push(removed);
                        state.sort();
                    }
                },
            )
            .await
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.core
            .optimistic(
                "clear notifications",
                |state, issued| {
                    let removed = std::mem::take(&mut state.items);
                    let newly_deleted: Vec<String> = removed
                        .iter()
                        .filter(|n| state.deleted_ids.insert(n.id.clone(), issued).is_none())
                        .map(|n| n.id.clone())
                        .collect();
                    Ok((removed, newly_deleted))
                },
                self.api.clear_notifications(),
                |state, (removed, newly_deleted)| {
                    for id in &newly_deleted {
                        state.deleted_ids.remove(id);
                    }
                    for item in removed {
                        if !state.items.iter().any(|n| n.id == item.id) {
                            state.items.push(item);
                        }
                    }
                    state.sort();
                },
            )
            .await
    }
}
