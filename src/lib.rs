//! Real-time event synchronization layer for the CV sharing app.
//!
//! One persistent realtime connection is shared by many independent state
//! containers. Each container reconciles pushed deltas against snapshots it
//! fetches from the REST API, without losing events across reconnects and
//! without letting malformed or late data crash the process.
//!
//! # Architecture
//!
//! - `config`: `SyncConfig`, reconnect bounds, env overrides
//! - `realtime`: transports (WebSocket, SSE fallback) and the `ConnectionManager`
//! - `bus`: event vocabulary and the fan-out `EventBus`
//! - `api`: REST collaborator traits and the reqwest-backed `RestClient`
//! - `stores`: notification, saved-record and listing stores

pub mod api;
pub mod bus;
pub mod config;
pub mod realtime;
pub mod stores;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

pub use api::{ApiError, RestClient};
pub use bus::{Event, EventBus, EventName};
pub use config::{ConfigError, SyncConfig};
pub use realtime::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use stores::{ListingStore, NotificationStore, SavedRecordStore, StoreError};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cvsync=debug,cvsync_lib=debug,info")),
        )
        .init();
}
