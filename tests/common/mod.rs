//! Shared fixtures for integration tests.

pub mod ws_server;

use std::time::Duration;

use cvsync_lib::config::ReconnectPolicy;
use cvsync_lib::realtime::ManagerOptions;
use cvsync_lib::ConnectionStatus;
use tokio::sync::watch;

pub use ws_server::WsServer;

/// Reconnect quickly and without jitter so tests stay deterministic.
pub fn fast_options() -> ManagerOptions {
    ManagerOptions {
        reconnect: ReconnectPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 5,
            jitter: 0.0,
        },
        activity_interval: None,
        close_timeout: Duration::from_secs(1),
    }
}

pub async fn wait_for_status(
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

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
