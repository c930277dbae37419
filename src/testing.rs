//! Scripted doubles for unit tests: a connector whose links are driven from
//! the test body, and an in-memory REST API.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::api::{
    ApiError, ListingApi, ListingItem, Notification, NotificationApi, SavedRecord, SavedRecordApi,
};
use crate::config::{ReconnectPolicy, TransportKind};
use crate::realtime::{
    ConnectionStatus, Connector, Frame, ManagerOptions, TransportError, TransportLink,
};

// ============================================================================
// Realtime
// ============================================================================

enum Remote {
    Frame(Frame),
    Fail(String),
    Close,
}

enum Script {
    Accept(MockLink),
    Fail(String),
}

/// Connector that hands out scripted links in order and fails once the
/// script runs dry.
#[derive(Default)]
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful connection and return the server side of it.
    pub(crate) fn accept_next(&self, session_id: &str) -> RemoteHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let link = MockLink {
            session_id: session_id.to_string(),
            inbound: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            live: Arc::clone(&self.live),
            handed_out: false,
        };
        self.script.lock().unwrap().push_back(Script::Accept(link));
        RemoteHandle { tx, sent, closed }
    }

    pub(crate) fn fail_next(&self, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Script::Fail(reason.to_string()));
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Links handed out and not yet dropped.
    pub(crate) fn live_links(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Accept(mut link)) => {
                link.handed_out = true;
                self.live.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(link))
            }
            Some(Script::Fail(reason)) => Err(TransportError::Connection(reason)),
            None => Err(TransportError::Connection("connection refused".to_string())),
        }
    }
}

pub(crate) struct MockLink {
    session_id: String,
    inbound: mpsc::UnboundedReceiver<Remote>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
    handed_out: bool,
}

#[async_trait]
impl TransportLink for MockLink {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        match self.inbound.recv().await? {
            Remote::Frame(frame) => Some(Ok(frame)),
            Remote::Fail(reason) => Some(Err(TransportError::Connection(reason))),
            Remote::Close => None,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if self.handed_out {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Server side of a scripted link.
pub(crate) struct RemoteHandle {
    tx: mpsc::UnboundedSender<Remote>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl RemoteHandle {
    pub(crate) fn push(&self, event: &str, data: Value) {
        let _ = self.tx.send(Remote::Frame(Frame::new(event, data)));
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.tx.send(Remote::Fail(reason.to_string()));
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(Remote::Close);
    }

    /// Frames the client sent on this link.
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fast, jitter-free reconnect bounds.
pub(crate) fn fast_options(max_attempts: u32) -> ManagerOptions {
    ManagerOptions {
        reconnect: ReconnectPolicy {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            max_attempts,
            jitter: 0.0,
        },
        activity_interval: None,
        close_timeout: Duration::from_secs(1),
    }
}

pub(crate) async fn wait_for_status(
    status: &mut watch::Receiver<ConnectionStatus>,
    what: &str,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let outcome = tokio::time::timeout(Duration::from_secs(5), status.wait_for(predicate))
        .await
        .map(|result| result.map(|current| (*current).clone()));
    match outcome {
        Ok(Ok(current)) => current,
        Ok(Err(_)) => panic!("status channel closed while waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}: {:?}", *status.borrow()),
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub(crate) async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// REST
// ============================================================================

/// In-memory API. Actions mutate the stored lists the way the server would.
#[derive(Default)]
pub(crate) struct MockApi {
    pub(crate) notifications: Mutex<Vec<Notification>>,
    pub(crate) saved: Mutex<Vec<SavedRecord>>,
    pub(crate) listings: Mutex<Vec<ListingItem>>,
    fail_actions: AtomicBool,
    fail_fetches: AtomicBool,
    fetch_delay_ms: AtomicUsize,
    fetches: AtomicUsize,
    actions: Mutex<Vec<String>>,
}

impl MockApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    async fn fetch<T: Clone>(&self, endpoint: &str, source: &Mutex<Vec<T>>) -> Result<Vec<T>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(source.lock().unwrap().clone())
    }

    fn act<F>(&self, action: String, apply: F) -> impl Future<Output = Result<(), ApiError>>
    where
        F: FnOnce(),
    {
        let failed = self.fail_actions.load(Ordering::SeqCst);
        if !failed {
            apply();
            self.actions.lock().unwrap().push(action.clone());
        }
        async move {
            tokio::task::yield_now().await;
            if failed {
                Err(ApiError::Status {
                    endpoint: action,
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

#[async_trait]
impl NotificationApi for MockApi {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.fetch("/notifications", &self.notifications).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.act(format!("read {id}"), || {
            for n in self.notifications.lock().unwrap().iter_mut().filter(|n| n.id == id) {
                n.read = true;
            }
        })
        .await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.act("read all".to_string(), || {
            for n in self.notifications.lock().unwrap().iter_mut() {
                n.read = true;
            }
        })
        .await
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.act(format!("delete {id}"), || {
            self.notifications.lock().unwrap().retain(|n| n.id != id);
        })
        .await
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.act("clear".to_string(), || {
            self.notifications.lock().unwrap().clear();
        })
        .await
    }
}

#[async_trait]
impl SavedRecordApi for MockApi {
    async fn list_saved_records(&self) -> Result<Vec<SavedRecord>, ApiError> {
        self.fetch("/saved-records", &self.saved).await
    }

    async fn mark_record_viewed(&self, id: &str) -> Result<(), ApiError> {
        self.act(format!("viewed {id}"), || {
            for r in self.saved.lock().unwrap().iter_mut().filter(|r| r.id == id) {
                r.has_unseen_update = false;
            }
        })
        .await
    }
}

#[async_trait]
impl ListingApi for MockApi {
    async fn list_listings(&self) -> Result<Vec<ListingItem>, ApiError> {
        self.fetch("/listings", &self.listings).await
    }
}
