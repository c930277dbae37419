//! Realtime channel: transports, the connection manager, and typed views of
//! inbound payloads.
//!
//! ```text
//! server ──▶ TransportLink ──▶ ConnectionManager ──▶ EventBus ──▶ stores
//!                 ▲                   │
//!                 └── authenticate / user-activity
//! ```

pub mod connection;
pub mod events;
pub mod transport;

pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, ManagerOptions, DEFAULT_CLOSE_TIMEOUT,
};
pub use events::{
    DataChanged, InboundEvent, ListingAction, ListingChanged, ListingItemViewed,
    NotificationPushed, RecordSavedByPeer, RecordUpdatedByOwner, RecordViewed,
};
pub use transport::{
    connector_from_config, Connector, FallbackConnector, Frame, SseConnector, SseEvent,
    TransportError, TransportLink, WebSocketConnector,
};
