//! Saved CVs and their "updated since you last looked" flags.
//!
//! The unseen flag is sticky: a push or a snapshot may raise it, only
//! [`SavedRecordStore::mark_viewed`] clears it. Clearing records the version
//! the user acknowledged, so a snapshot still carrying the old flag for that
//! same version cannot raise it again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::{Fetcher, Phase, Reconcile, StoreCore, StoreError};
use crate::api::{SavedRecord, SavedRecordApi};
use crate::bus::{CallbackError, Event, EventBus, EventName};
use crate::realtime::InboundEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledRecord {
    pub id: String,
    pub title: String,
    pub owner_name: Option<String>,
    /// Newest version seen from either a push or a snapshot.
    pub updated_at: Option<DateTime<Utc>>,
    pub has_unseen_update: bool,
    /// Version the user last acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl ReconciledRecord {
    fn is_acknowledged(&self, version: Option<DateTime<Utc>>) -> bool {
        match (version, self.acknowledged_at) {
            (Some(version), Some(acknowledged)) => version <= acknowledged,
            _ => false,
        }
    }
}

/// An update pushed for a record the store has not seen in a snapshot yet.
#[derive(Debug, Clone, Copy)]
struct PendingUpdate {
    version: Option<DateTime<Utc>>,
    watermark: u64,
}

#[derive(Debug, Default)]
pub struct SavedRecordState {
    records: BTreeMap<String, ReconciledRecord>,
    pending: HashMap<String, PendingUpdate>,
}

impl SavedRecordState {
    fn mark_unseen(&mut self, id: &str, version: Option<DateTime<Utc>>, watermark: u64) {
        match self.records.get_mut(id) {
            Some(record) => {
                if record.is_acknowledged(version) {
                    debug!(record_id = id, "update already acknowledged");
                    return;
                }
                record.has_unseen_update = true;
                record.updated_at = record.updated_at.max(version);
            }
            None => {
                let entry = self.pending.entry(id.to_string()).or_insert(PendingUpdate {
                    version,
                    watermark,
                });
                entry.version = entry.version.max(version);
                entry.watermark = entry.watermark.max(watermark);
            }
        }
    }
}

impl Reconcile for SavedRecordState {
    type Snapshot = Vec<SavedRecord>;

    fn interests() -> &'static [EventName] {
        &[EventName::RecordUpdatedByOwner, EventName::DataChanged]
    }

    fn apply_event(&mut self, event: &Event, watermark: u64) -> Result<(), CallbackError> {
        match InboundEvent::from_event(event)? {
            InboundEvent::RecordUpdatedByOwner(update) => {
                self.mark_unseen(&update.record_id, update.updated_at, watermark);
                if let (Some(title), Some(record)) = (update.title, self.records.get_mut(&update.record_id)) {
                    record.title = title;
                }
            }
            // Re-fetch only.
            InboundEvent::DataChanged(_) => {}
            other => debug!(event = %other.name(), "saved record store ignores event"),
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Vec<SavedRecord>, seq: u64) {
        let mut next = BTreeMap::new();
        for server in snapshot {
            let local = self.records.get(&server.id);
            let acknowledged_at = local.and_then(|r| r.acknowledged_at);
            let acknowledged =
                |version: Option<DateTime<Utc>>| matches!((version, acknowledged_at), (Some(v), Some(a)) if v <= a);

            let pending = self.pending.remove(&server.id);
            let server_unseen = server.has_unseen_update && !acknowledged(Some(server.updated_at));
            let pending_unseen = pending.is_some_and(|p| !acknowledged(p.version));
            let local_unseen = local.is_some_and(|r| r.has_unseen_update);

            let updated_at = local
                .and_then(|r| r.updated_at)
                .max(Some(server.updated_at))
                .max(pending.and_then(|p| p.version));

            next.insert(
                server.id.clone(),
                ReconciledRecord {
                    id: server.id,
                    title: server.title,
                    owner_name: server.owner_name,
                    updated_at,
                    has_unseen_update: local_unseen || server_unseen || pending_unseen,
                    acknowledged_at,
                },
            );
        }

        // Updates for records this snapshot did not contain survive only if
        // the snapshot predates them.
        self.pending.retain(|_, p| seq <= p.watermark);
        self.records = next;
    }
}

/// CVs the user saved, with per-record unseen-update flags.
pub struct SavedRecordStore {
    core: StoreCore<SavedRecordState>,
    api: Arc<dyn SavedRecordApi>,
}

impl SavedRecordStore {
    pub async fn mount(bus: Arc<EventBus>, api: Arc<dyn SavedRecordApi>) -> Self {
        let source = Arc::clone(&api);
        let fetcher: Fetcher<Vec<SavedRecord>> = Arc::new(move || {
            let api = Arc::clone(&source);
            Box::pin(async move { api.list_saved_records().await })
        });
        let core = StoreCore::mount("saved-records", SavedRecordState::default(), bus, fetcher).await;
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

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.core.changes()
    }

    /// Most recently updated first.
    pub fn records(&self) -> Vec<ReconciledRecord> {
        let mut records: Vec<_> = self.core.read(|state| state.records.values().cloned().collect());
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records
    }

    pub fn record(&self, id: &str) -> Option<ReconciledRecord> {
        self.core.read(|state| state.records.get(id).cloned())
    }

    pub fn unseen_count(&self) -> usize {
        self.core
            .read(|state| state.records.values().filter(|r| r.has_unseen_update).count())
    }

    /// Clear the unseen flag and acknowledge the current version.
    pub async fn mark_viewed(&self, id: &str) -> Result<(), StoreError> {
        self.core
            .optimistic(
                "mark viewed",
                |state, _| {
                    let Some(record) = state.records.get_mut(id) else {
                        return Err(StoreError::NotFound {
                            kind: "saved record",
                            id: id.to_string(),
                        });
                    };
                    let previous = (record.has_unseen_update, record.acknowledged_at);
                    record.has_unseen_update = false;
                    record.acknowledged_at =
                        Some(record.updated_at.unwrap_or_else(Utc::now)).max(record.acknowledged_at);
                    Ok(previous)
                },
                self.api.mark_record_viewed(id),
                |state, (had_unseen, acknowledged_at)| {
                    if let Some(record) = state.records.get_mut(id) {
                        record.has_unseen_update |= had_unseen;
                        record.acknowledged_at = acknowledged_at;
                    }
                },
            )
            .await
    }
}
