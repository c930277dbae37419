//! In-process event bus decoupling the realtime transport from consumers.
//!
//! # Architecture
//!
//! Events flow from server → ConnectionManager → EventBus → stores:
//! - `ConnectionManager`: validates each inbound frame and dispatches it
//! - `EventBus`: ordered callback lists keyed by [`EventName`]
//! - stores: apply the event locally, then reconcile with a fresh snapshot
//!
//! Nothing is buffered: events pushed before a consumer subscribes are lost,
//! which every consumer covers with its own snapshot fetch at mount.

mod event_bus;
mod event_types;

pub use event_bus::{Callback, CallbackError, DispatchReport, EventBus, SubscriptionId};
pub use event_types::*;
