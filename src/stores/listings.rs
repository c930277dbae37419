//! Live public listing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::{Fetcher, Phase, Reconcile, StoreCore};
use crate::api::{ListingApi, ListingItem};
use crate::bus::{CallbackError, Event, EventBus, EventName};
use crate::realtime::{InboundEvent, ListingAction};

#[derive(Debug, Default)]
pub struct ListingState {
    /// Most recently updated first.
    items: Vec<ListingItem>,
    /// Removed ids with the watermark of their removal push.
    tombstones: HashMap<String, u64>,
    /// Pushed upserts with the watermark of their push.
    upserts: HashMap<String, u64>,
    /// Highest view count pushed per item.
    view_floor: HashMap<String, u64>,
}

impl ListingState {
    fn sort(&mut self) {
        self.items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    fn upsert(&mut self, mut item: ListingItem) {
        if let Some(floor) = self.view_floor.get(&item.id) {
            item.view_count = item.view_count.max(*floor);
        }
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => {
                item.view_count = item.view_count.max(existing.view_count);
                *existing = item;
            }
            None => self.items.push(item),
        }
        self.sort();
    }

    fn raise_views(&mut self, id: &str, count: u64) {
        let floor = self.view_floor.entry(id.to_string()).or_default();
        *floor = (*floor).max(count);
        if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
            item.view_count = item.view_count.max(count);
        }
    }
}

impl Reconcile for ListingState {
    type Snapshot = Vec<ListingItem>;

    fn interests() -> &'static [EventName] {
        &[
            EventName::ListingChanged,
            EventName::ListingItemViewed,
            EventName::DataChanged,
        ]
    }

    fn apply_event(&mut self, event: &Event, watermark: u64) -> Result<(), CallbackError> {
        match InboundEvent::from_event(event)? {
            InboundEvent::ListingChanged(change) => match change.action {
                ListingAction::Added | ListingAction::Updated => {
                    self.tombstones.remove(&change.item_id);
                    match change.item {
                        Some(item) if item.id == change.item_id => {
                            self.upserts.insert(change.item_id, watermark);
                            self.upsert(item);
                        }
                        Some(_) => {
                            return Err(CallbackError::Failed(format!(
                                "listing item does not match itemId '{}'",
                                change.item_id
                            )));
                        }
                        None => debug!(item_id = %change.item_id, "listing change without item, waiting for refresh"),
                    }
                }
                ListingAction::Removed => {
                    self.items.retain(|i| i.id != change.item_id);
                    self.upserts.remove(&change.item_id);
                    self.view_floor.remove(&change.item_id);
                    self.tombstones.insert(change.item_id, watermark);
                }
            },
            InboundEvent::ListingItemViewed(viewed) => match viewed.view_count {
                Some(count) => self.raise_views(&viewed.item_id, count),
                None => debug!(item_id = %viewed.item_id, "view without count, waiting for refresh"),
            },
            InboundEvent::DataChanged(_) => {}
            other => debug!(event = %other.name(), "listing store ignores event"),
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Vec<ListingItem>, seq: u64) {
        self.tombstones.retain(|_, watermark| seq <= *watermark);
        self.upserts.retain(|_, watermark| seq <= *watermark);

        // Floors only matter while the server lags behind a pushed count.
        let server_views: HashMap<&str, u64> = snapshot
            .iter()
            .map(|item| (item.id.as_str(), item.view_count))
            .collect();
        let upserts = &self.upserts;
        self.view_floor.retain(|id, floor| match server_views.get(id.as_str()) {
            Some(count) => *count < *floor,
            None => upserts.contains_key(id),
        });

        let mut next: Vec<ListingItem> = snapshot
            .into_iter()
            .filter(|item| !self.tombstones.contains_key(&item.id))
            .map(|mut item| {
                if let Some(floor) = self.view_floor.get(&item.id) {
                    item.view_count = item.view_count.max(*floor);
                }
                item
            })
            .collect();

        for id in self.upserts.keys() {
            let Some(local) = self.items.iter().find(|i| &i.id == id) else {
                continue;
            };
            match next.iter_mut().find(|i| &i.id == id) {
                Some(server) if server.updated_at < local.updated_at => *server = local.clone(),
                Some(_) => {}
                None => next.push(local.clone()),
            }
        }

        self.items = next;
        self.sort();
    }
}

/// The public CV listing, kept live by pushes.
pub struct ListingStore {
    core: StoreCore<ListingState>,
}

impl ListingStore {
    pub async fn mount(bus: Arc<EventBus>, api: Arc<dyn ListingApi>) -> Self {
        let fetcher: Fetcher<Vec<ListingItem>> = Arc::new(move || {
            let api = Arc::clone(&api);
            Box::pin(async move { api.list_listings().await })
        });
        let core = StoreCore::mount("listings", ListingState::default(), bus, fetcher).await;
        Self { core }
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

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.core.changes()
    }

    pub fn items(&self) -> Vec<ListingItem> {
        self.core.read(|state| state.items.clone())
    }

    pub fn item(&self, id: &str) -> Option<ListingItem> {
        self.core
            .read(|state| state.items.iter().find(|i| i.id == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.core.read(|state| state.items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
