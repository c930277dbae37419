//! Realtime connection management.
//!
//! One [`ConnectionManager`] owns at most one live transport. A background
//! driver task connects, replays the cached identity after every
//! (re)connect, forwards whitelisted inbound events to the [`EventBus`], and
//! reconnects with bounded exponential backoff. Every public entry point is
//! infallible: failures are logged and reflected in [`ConnectionStatus`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::transport::{connector_from_config, Connector, Frame, TransportError, TransportLink};
use crate::bus::{Event, EventBus, EventName, EVENT_CONNECT, EVENT_ERROR};
use crate::config::{ReconnectPolicy, SyncConfig, TransportKind};

/// How long `disconnect` waits for the driver to close the transport.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Snapshot of the connection, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    /// Identity announced on the current session, if any.
    pub user_id: Option<String>,
    pub transport: Option<TransportKind>,
    /// Consecutive failed connection attempts.
    pub attempts: u32,
    /// Automatic retries stopped at the attempt ceiling. Cleared by `connect`.
    pub exhausted: bool,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: None,
            user_id: None,
            transport: None,
            attempts: 0,
            exhausted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub reconnect: ReconnectPolicy,
    /// Period of the `user-activity` heartbeat. `None` disables it.
    pub activity_interval: Option<Duration>,
    pub close_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            activity_interval: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            activity_interval: config.activity_interval(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
enum Command {
    Emit(Frame),
    Authenticate(String),
    Resume,
    Shutdown,
}

struct DriverHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    options: ManagerOptions,
    status: watch::Sender<ConnectionStatus>,
    identity: Mutex<Option<String>>,
    /// Owner of the status channel. Bumped by every `connect` that spawns a
    /// driver and by every `disconnect`.
    generation: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn claim_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply `f` only if `generation` still owns the status. Writes from a
    /// superseded driver are dropped.
    fn update(&self, generation: u64, f: impl FnOnce(&mut ConnectionStatus)) -> bool {
        let mut f = Some(f);
        self.status.send_if_modified(|status| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if let Some(f) = f.take() {
                f(status);
            }
            true
        })
    }

    fn identity(&self) -> MutexGuard<'_, Option<String>> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_stopped(&self, generation: u64) -> bool {
        self.update(generation, |s| *s = ConnectionStatus::disconnected())
    }

    /// Validate an inbound frame and hand it to the bus.
    fn forward(&self, frame: Frame) {
        match frame.event.as_str() {
            EVENT_ERROR => {
                warn!(payload = %frame.data, "realtime server reported an error");
                return;
            }
            EVENT_CONNECT => {
                debug!("ignoring repeated connect frame");
                return;
            }
            _ => {}
        }

        let Some(name) = EventName::from_wire(&frame.event) else {
            debug!(event = %frame.event, "ignoring unrecognised realtime event");
            return;
        };

        match Event::from_value(name, frame.data) {
            Ok(event) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                let report = self.bus.dispatch_event(&event);
                trace!(
                    event = %name,
                    invoked = report.invoked,
                    failed = report.failed,
                    "forwarded realtime event"
                );
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = %name, error = %e, "dropping malformed realtime payload");
            }
        }
    }
}

/// Owns the realtime connection for one client.
///
/// Cheap to share behind an `Arc`; consumers usually only need
/// [`ConnectionManager::bus`].
pub struct ConnectionManager {
    shared: Arc<Shared>,
    driver: Mutex<Option<DriverHandle>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, bus: Arc<EventBus>, mut options: ManagerOptions) -> Self {
        if options.activity_interval.is_some_and(|period| period.is_zero()) {
            warn!("zero activity interval, heartbeat disabled");
            options.activity_interval = None;
        }
        let (status, _) = watch::channel(ConnectionStatus::disconnected());
        Self {
            shared: Arc::new(Shared {
                connector,
                bus,
                options,
                status,
                identity: Mutex::new(None),
                generation: AtomicU64::new(0),
                forwarded: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Build a manager with the transport chain from `config`.
    pub fn from_config(config: &SyncConfig, bus: Arc<EventBus>) -> Result<Self, TransportError> {
        let connector = connector_from_config(config)?;
        Ok(Self::new(connector, bus, ManagerOptions::from_config(config)))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    fn driver(&self) -> MutexGuard<'_, Option<DriverHandle>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_command(&self, command: Command) -> bool {
        match self.driver().as_ref() {
            Some(handle) => handle.commands.send(command).is_ok(),
            None => false,
        }
    }

    /// Start the connection if none exists.
    ///
    /// Idempotent while a connection is live or being established. After
    /// retries were exhausted this resumes with a fresh attempt budget.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut driver = self.driver();

        if let Some(handle) = driver.as_ref() {
            if !handle.task.is_finished() {
                let status = self.shared.status.borrow().clone();
                if status.exhausted {
                    info!(driver = %handle.id, "resuming realtime connection");
                    let _ = handle.commands.send(Command::Resume);
                } else {
                    debug!(driver = %handle.id, state = %status.state, "connect() ignored, connection already active");
                }
                return;
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "connect() called outside a tokio runtime");
                return;
            }
        };

        let id = Uuid::new_v4();
        let generation = self.shared.claim_generation();
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = runtime.spawn(drive(self.shared.clone(), receiver, id, generation));
        info!(driver = %id, "starting realtime connection");
        *driver = Some(DriverHandle { id, commands, task });
    }

    /// Announce the user on the current session and cache the id for replay
    /// after every reconnect. Empty ids are ignored.
    pub fn authenticate(&self, user_id: impl Into<String>) {
        let user_id = user_id.into().trim().to_string();
        if user_id.is_empty() {
            warn!("ignoring authenticate() with an empty user id");
            return;
        }

        let already_announced = {
            let mut identity = self.shared.identity();
            let same = identity.as_deref() == Some(user_id.as_str());
            *identity = Some(user_id.clone());
            same && self.shared.status.borrow().user_id.as_deref() == Some(user_id.as_str())
        };
        if already_announced {
            debug!(user_id = %user_id, "identity already announced on this session");
            return;
        }

        if !self.send_command(Command::Authenticate(user_id.clone())) {
            debug!(user_id = %user_id, "no active connection, identity cached for next connect");
        }
    }

    /// Emit a `user-activity` heartbeat for the announced identity.
    pub fn report_activity(&self) {
        let status = self.status();
        let Some(user_id) = status.user_id else {
            debug!("report_activity() ignored, no identity announced");
            return;
        };
        if status.state != ConnectionState::Connected {
            debug!(state = %status.state, "report_activity() ignored while not connected");
            return;
        }
        self.send_command(Command::Emit(Frame::user_activity(&user_id)));
    }

    /// Close the transport, stop forwarding and clear the cached identity and
    /// attempt counter. Safe to call at any time, including repeatedly.
    pub async fn disconnect(&self) {
        let (handle, generation) = {
            let mut driver = self.driver();
            (driver.take(), self.shared.claim_generation())
        };
        self.shared.identity().take();

        if let Some(mut handle) = handle {
            let _ = handle.commands.send(Command::Shutdown);
            match tokio::time::timeout(self.shared.options.close_timeout, &mut handle.task).await {
                Ok(Ok(())) => debug!(driver = %handle.id, "realtime driver stopped"),
                Ok(Err(e)) => warn!(driver = %handle.id, error = %e, "realtime driver ended abnormally"),
                Err(_) => {
                    warn!(driver = %handle.id, "realtime driver did not stop in time, aborting");
                    handle.task.abort();
                }
            }
            info!(driver = %handle.id, "realtime connection closed");
        }

        if !self.shared.mark_stopped(generation) {
            debug!("connect() during disconnect, leaving the new connection's status");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().state == ConnectionState::Connected
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Events handed to the bus since the manager was created.
    pub fn forwarded_events(&self) -> u64 {
        self.shared.forwarded.load(Ordering::Relaxed)
    }

    /// Whitelisted events dropped because their payload was not an object.
    pub fn dropped_payloads(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.driver().take() {
            let _ = handle.commands.send(Command::Shutdown);
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

enum SessionEnd {
    Dropped,
    Shutdown,
}

async fn drive(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    id: Uuid,
    generation: u64,
) {
    let policy = shared.options.reconnect.clone();
    let mut attempts: u32 = 0;
    let mut reconnecting = false;

    loop {
        shared.update(generation, |s| {
            s.state = if reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            s.attempts = attempts;
            s.exhausted = false;
        });

        let outcome = {
            let connect = shared.connector.connect();
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    command = commands.recv() => match command {
                        Some(Command::Shutdown) | None => break None,
                        Some(other) => ignore_while_offline(other),
                    },
                }
            }
        };
        let Some(result) = outcome else {
            debug!(driver = %id, "shutdown during connect");
            break;
        };

        match result {
            Ok(link) => {
                attempts = 0;
                reconnecting = true;
                match run_session(&shared, generation, link, &mut commands).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped => {
                        shared.update(generation, |s| {
                            s.state = ConnectionState::Reconnecting;
                            s.session_id = None;
                            s.user_id = None;
                            s.transport = None;
                        });
                    }
                }
                if !wait_backoff(&mut commands, policy.delay_for(0)).await {
                    break;
                }
            }
            Err(e) => {
                attempts += 1;
                reconnecting = true;
                warn!(
                    driver = %id,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "realtime connect failed"
                );

                if attempts >= policy.max_attempts {
                    error!(
                        driver = %id,
                        attempts,
                        "realtime reconnection attempts exhausted; live updates paused until connect() is called"
                    );
                    shared.update(generation, |s| {
                        *s = ConnectionStatus::disconnected();
                        s.attempts = attempts;
                        s.exhausted = true;
                    });
                    if !wait_for_resume(&mut commands).await {
                        break;
                    }
                    attempts = 0;
                    reconnecting = false;
                    continue;
                }

                shared.update(generation, |s| {
                    s.state = ConnectionState::Reconnecting;
                    s.attempts = attempts;
                });
                if !wait_backoff(&mut commands, policy.delay_for(attempts - 1)).await {
                    break;
                }
            }
        }
    }

    shared.mark_stopped(generation);
}

async fn run_session(
    shared: &Shared,
    generation: u64,
    mut link: Box<dyn TransportLink>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let session_id = link.session_id().to_string();
    let kind = link.kind();
    info!(session_id = %session_id, transport = %kind, "realtime connected");
    shared.update(generation, |s| {
        s.state = ConnectionState::Connected;
        s.session_id = Some(session_id.clone());
        s.transport = Some(kind);
        s.user_id = None;
        s.attempts = 0;
        s.exhausted = false;
    });

    let cached = shared.identity().clone();
    if let Some(user_id) = cached {
        if let Err(e) = announce(shared, generation, link.as_mut(), &user_id).await {
            warn!(session_id = %session_id, error = %e, "identity replay failed");
            let _ = link.close().await;
            return SessionEnd::Dropped;
        }
    }

    let mut activity = shared.options.activity_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            frame = link.next_frame() => match frame {
                Some(Ok(frame)) => shared.forward(frame),
                Some(Err(TransportError::InvalidFrame(reason))) => {
                    warn!(session_id = %session_id, reason = %reason, "discarding unparseable frame");
                }
                Some(Err(e)) => {
                    warn!(session_id = %session_id, error = %e, "realtime transport error");
                    let _ = link.close().await;
                    return SessionEnd::Dropped;
                }
                None => {
                    info!(session_id = %session_id, "realtime transport closed by server");
                    return SessionEnd::Dropped;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Emit(frame)) => {
                    if let Err(e) = link.send(&frame).await {
                        warn!(session_id = %session_id, event = %frame.event, error = %e, "emit failed");
                        let _ = link.close().await;
                        return SessionEnd::Dropped;
                    }
                }
                Some(Command::Authenticate(user_id)) => {
                    if shared.status.borrow().user_id.as_deref() == Some(user_id.as_str()) {
                        trace!(user_id = %user_id, "identity already announced, skipping");
                        continue;
                    }
                    if let Err(e) = announce(shared, generation, link.as_mut(), &user_id).await {
                        warn!(session_id = %session_id, error = %e, "authenticate failed");
                        let _ = link.close().await;
                        return SessionEnd::Dropped;
                    }
                }
                Some(Command::Resume) => {}
                Some(Command::Shutdown) | None => {
                    if let Err(e) = link.close().await {
                        debug!(session_id = %session_id, error = %e, "error while closing transport");
                    }
                    return SessionEnd::Shutdown;
                }
            },
            _ = next_tick(&mut activity) => {
                let user_id = shared.status.borrow().user_id.clone();
                if let Some(user_id) = user_id {
                    if let Err(e) = link.send(&Frame::user_activity(&user_id)).await {
                        warn!(session_id = %session_id, error = %e, "activity heartbeat failed");
                        let _ = link.close().await;
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }
}

async fn announce(
    shared: &Shared,
    generation: u64,
    link: &mut dyn TransportLink,
    user_id: &str,
) -> Result<(), TransportError> {
    link.send(&Frame::authenticate(user_id)).await?;
    info!(user_id = %user_id, session_id = %link.session_id(), "identity announced");
    shared.update(generation, |s| s.user_id = Some(user_id.to_string()));
    Ok(())
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn ignore_while_offline(command: Command) {
    match command {
        Command::Emit(frame) => debug!(event = %frame.event, "dropping outbound frame while offline"),
        Command::Authenticate(user_id) => {
            debug!(user_id = %user_id, "identity cached, will be announced on connect")
        }
        Command::Resume | Command::Shutdown => {}
    }
}

/// Sleep for `delay`. Returns `false` on shutdown; a resume cuts the wait short.
async fn wait_backoff(commands: &mut mpsc::UnboundedReceiver<Command>, delay: Duration) -> bool {
    debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => return false,
                Some(Command::Resume) => return true,
                Some(other) => ignore_while_offline(other),
            },
        }
    }
}

/// Park until `connect()` asks for a new attempt budget. Returns `false` on shutdown.
async fn wait_for_resume(commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    loop {
        match commands.recv().await {
            Some(Command::Resume) => return true,
            Some(Command::Shutdown) | None => return false,
            Some(other) => ignore_while_offline(other),
        }
    }
}
