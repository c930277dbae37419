//! Consumer-side state containers fed by the realtime bus.
//!
//! Every store follows the same cycle:
//!
//! 1. **Mount**: subscribe to its event names, fetch an authoritative
//!    snapshot, then go `Ready`.
//! 2. **Push**: apply a minimal local mutation immediately, then re-fetch in
//!    the background. Mutation and snapshot commute.
//! 3. **Unmount**: unsubscribe and flip the liveness flag so in-flight
//!    fetches drop their results.
//!
//! Fetches are numbered. A response older than the newest applied one is
//! discarded, and each push records how many fetches had been issued when it
//! arrived (its *watermark*) so a snapshot can tell whether it was taken
//! before or after that push.

pub mod listings;
pub mod notifications;
pub mod saved_records;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::bus::{CallbackError, Event, EventBus, EventName, SubscriptionId};

pub use listings::ListingStore;
pub use notifications::{NotificationStore, Toast};
pub use saved_records::{ReconciledRecord, SavedRecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{action} failed: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: ApiError,
    },
    #[error("unknown {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },
}

/// Local state of one store and the rules for folding pushes and snapshots
/// into it.
pub trait Reconcile: Send + 'static {
    type Snapshot: Send + 'static;

    /// Event names the store listens to.
    fn interests() -> &'static [EventName];

    /// Apply the immediate mutation for a pushed event. `watermark` is the
    /// number of fetches issued before this push; snapshots with a higher
    /// sequence number were taken after it.
    fn apply_event(&mut self, event: &Event, watermark: u64) -> Result<(), CallbackError>;

    /// Fold the snapshot returned by fetch number `seq` into local state.
    fn apply_snapshot(&mut self, snapshot: Self::Snapshot, seq: u64);
}

pub(crate) type Fetcher<S> = Arc<dyn Fn() -> BoxFuture<'static, Result<S, ApiError>> + Send + Sync>;

struct Tracked<R> {
    state: R,
    phase: Phase,
    last_error: Option<String>,
    issued: u64,
    applied: u64,
}

struct CoreShared<R: Reconcile> {
    name: &'static str,
    inner: Mutex<Tracked<R>>,
    alive: AtomicBool,
    fetcher: Fetcher<R::Snapshot>,
    revision: watch::Sender<u64>,
}

impl<R: Reconcile> CoreShared<R> {
    fn lock(&self) -> MutexGuard<'_, Tracked<R>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn on_event(self: &Arc<Self>, event: &Event) -> Result<(), CallbackError> {
        if !self.is_alive() {
            return Ok(());
        }
        {
            let mut tracked = self.lock();
            let watermark = tracked.issued;
            tracked.state.apply_event(event, watermark)?;
        }
        self.bump();
        self.spawn_refresh();
        Ok(())
    }

    /// Number the next fetch and start it. The returned future resolves the
    /// request; `finish_fetch` decides whether the result is still wanted.
    fn begin_fetch(&self) -> (u64, BoxFuture<'static, Result<R::Snapshot, ApiError>>) {
        let seq = {
            let mut tracked = self.lock();
            tracked.issued += 1;
            if tracked.phase == Phase::Idle {
                tracked.phase = Phase::Loading;
            }
            tracked.issued
        };
        (seq, (self.fetcher)())
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(store = self.name, "no tokio runtime, skipping background refresh");
                return;
            }
        };
        let (seq, fetch) = self.begin_fetch();
        let this = Arc::clone(self);
        runtime.spawn(async move {
            let result = fetch.await;
            this.finish_fetch(seq, result);
        });
    }

    async fn refresh(&self) {
        let (seq, fetch) = self.begin_fetch();
        let result = fetch.await;
        self.finish_fetch(seq, result);
    }

    fn finish_fetch(&self, seq: u64, result: Result<R::Snapshot, ApiError>) {
        if !self.is_alive() {
            debug!(store = self.name, seq, "discarding fetch for unmounted store");
            return;
        }
        {
            let mut tracked = self.lock();
            if seq <= tracked.applied {
                debug!(store = self.name, seq, applied = tracked.applied, "discarding stale snapshot");
                return;
            }
            match result {
                Ok(snapshot) => {
                    tracked.state.apply_snapshot(snapshot, seq);
                    tracked.applied = seq;
                    tracked.last_error = None;
                    debug!(store = self.name, seq, "snapshot applied");
                }
                Err(e) => {
                    warn!(store = self.name, seq, error = %e, "snapshot fetch failed");
                    tracked.last_error = Some(e.to_string());
                }
            }
            tracked.phase = Phase::Ready;
        }
        self.bump();
    }
}

/// Lifecycle and bookkeeping shared by every store.
pub(crate) struct StoreCore<R: Reconcile> {
    shared: Arc<CoreShared<R>>,
    bus: Arc<EventBus>,
    subscriptions: Mutex<Vec<(EventName, SubscriptionId)>>,
}

impl<R: Reconcile> StoreCore<R> {
    /// Subscribe, then fetch the first snapshot. Returns once it resolved.
    pub(crate) async fn mount(
        name: &'static str,
        state: R,
        bus: Arc<EventBus>,
        fetcher: Fetcher<R::Snapshot>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(CoreShared {
            name,
            inner: Mutex::new(Tracked {
                state,
                phase: Phase::Idle,
                last_error: None,
                issued: 0,
                applied: 0,
            }),
            alive: AtomicBool::new(true),
            fetcher,
            revision,
        });

        let subscriptions = R::interests()
            .iter()
            .map(|&event_name| {
                let handler = Arc::clone(&shared);
                let id = bus.subscribe(event_name, move |event| handler.on_event(event));
                (event_name, id)
            })
            .collect::<Vec<_>>();
        info!(store = name, events = subscriptions.len(), "store mounted");

        let core = Self {
            shared,
            bus,
            subscriptions: Mutex::new(subscriptions),
        };
        core.shared.refresh().await;
        core
    }

    /// Unsubscribe and drop any in-flight fetch results. Idempotent.
    pub(crate) fn unmount(&self) {
        self.shared.alive.store(false, Ordering::Release);
        let subscriptions = std::mem::take(
            &mut *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()),
        );
        if subscriptions.is_empty() {
            return;
        }
        for (event_name, id) in subscriptions {
            self.bus.unsubscribe(event_name, id);
        }
        info!(store = self.shared.name, "store unmounted");
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.shared.is_alive()
    }

    pub(crate) async fn refresh(&self) {
        if self.is_mounted() {
            self.shared.refresh().await;
        }
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.shared.lock().state)
    }

    /// Mutate local state outside of a push, e.g. for a user action.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        self.mutate_at(|state, _| f(state))
    }

    /// Like [`mutate`](Self::mutate), also passing the number of fetches
    /// issued so far. Snapshots numbered above it were requested afterwards.
    pub(crate) fn mutate_at<T>(&self, f: impl FnOnce(&mut R, u64) -> T) -> T {
        let out = {
            let mut guard = self.shared.lock();
            let tracked = &mut *guard;
            f(&mut tracked.state, tracked.issued)
        };
        self.shared.bump();
        out
    }

    pub(crate) fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub(crate) fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Optimistic user action: `apply` changes local state and returns an
    /// undo token, `persist` tells the server, and `rollback` restores the
    /// previous state if the server refused. `apply` also receives the
    /// number of fetches issued before the action.
    pub(crate) async fn optimistic<U, Fut>(
        &self,
        action: &'static str,
        apply: impl FnOnce(&mut R, u64) -> Result<U, StoreError>,
        persist: Fut,
        rollback: impl FnOnce(&mut R, U),
    ) -> Result<(), StoreError>
    where
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let undo = self.mutate_at(apply)?;
        match persist.await {
            Ok(()) => {
                self.shared.lock().last_error = None;
                debug!(store = self.shared.name, action, "action persisted");
                Ok(())
            }
            Err(source) => {
                warn!(store = self.shared.name, action, error = %source, "action failed, rolling back");
                if self.is_mounted() {
                    self.mutate(|state| rollback(state, undo));
                    self.shared.lock().last_error = Some(format!("{action} failed: {source}"));
                }
                Err(StoreError::Action { action, source })
            }
        }
    }
}

impl<R: Reconcile> Drop for StoreCore<R> {
    fn drop(&mut self) {
        self.unmount();
    }
}
