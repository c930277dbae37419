use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::event_types::{Event, EventName, Payload, PayloadError};

/// Error a subscriber callback may return. The bus logs it and moves on to
/// the next subscriber.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("{0}")]
    Failed(String),
}

pub type Callback = Arc<dyn Fn(&Event) -> Result<(), CallbackError> + Send + Sync>;

/// Identifies one registered callback. Returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks invoked, successful or not.
    pub invoked: usize,
    /// Callbacks that returned an error or panicked.
    pub failed: usize,
}

/// In-process publish/subscribe registry keyed by event name.
///
/// Dispatch is synchronous: every callback registered for the name when the
/// pass starts runs in registration order, each isolated from the others.
pub struct EventBus {
    subscribers: DashMap<EventName, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a callback for `name`.
    pub fn subscribe<F>(&self, name: EventName, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.entry(name).or_default().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        tracing::trace!(event = %name, subscription = id.0, "subscribed");
        id
    }

    /// Remove the callback registered under `id` for `name`.
    ///
    /// Returns `false` for stale or unknown pairs.
    pub fn unsubscribe(&self, name: EventName, id: SubscriptionId) -> bool {
        let removed = match self.subscribers.get_mut(&name) {
            Some(mut list) => match list.iter().position(|s| s.id == id) {
                Some(index) => {
                    list.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };
        self.subscribers.remove_if(&name, |_, list| list.is_empty());

        if removed {
            tracing::trace!(event = %name, subscription = id.0, "unsubscribed");
        }
        removed
    }

    /// Build an event from `payload` and dispatch it.
    pub fn dispatch(&self, name: EventName, payload: Payload) -> DispatchReport {
        self.dispatch_event(&Event::new(name, payload))
    }

    pub fn dispatch_event(&self, event: &Event) -> DispatchReport {
        // Snapshot so callbacks can (un)subscribe without holding the shard lock.
        let snapshot = match self.subscribers.get(&event.name) {
            Some(list) => list.value().clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for subscriber in snapshot {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        event = %event.name,
                        subscription = subscriber.id.0,
                        error = %e,
                        "event subscriber failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        event = %event.name,
                        subscription = subscriber.id.0,
                        panic = panic_message(panic.as_ref()),
                        "event subscriber panicked"
                    );
                }
            }
        }
        report
    }

    pub fn subscriber_count(&self, name: EventName) -> usize {
        self.subscribers
            .get(&name)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<(EventName, usize)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
