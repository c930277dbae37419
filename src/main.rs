use std::path::PathBuf;
use std::sync::Arc;

use cvsync_lib::api::RestClient;
use cvsync_lib::bus::EventBus;
use cvsync_lib::config::SyncConfig;
use cvsync_lib::realtime::ConnectionManager;
use cvsync_lib::stores::{ListingStore, NotificationStore, SavedRecordStore};
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    cvsync_lib::init_tracing();

    if let Err(error) = run().await {
        eprintln!("cvsync failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut config_path: Option<PathBuf> = None;
    let mut user_override: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or("--config requires a path")?;
                config_path = Some(PathBuf::from(value));
            }
            "--user" => {
                let value = args.next().ok_or("--user requires a user id")?;
                user_override = Some(value);
            }
            "--help" | "-h" => {
                println!("usage: cvsync [--config <file.json>] [--user <id>]");
                return Ok(());
            }
            other => return Err(format!("unknown argument '{other}'. Use --help")),
        }
    }

    let mut config = match &config_path {
        Some(path) => SyncConfig::load(path).map_err(|e| e.to_string())?,
        None => SyncConfig::default(),
    };
    config.apply_env_overrides();
    if user_override.is_some() {
        config.user_id = user_override;
    }
    config.validate().map_err(|e| e.to_string())?;

    let bus = Arc::new(EventBus::new());
    let api = Arc::new(RestClient::from_config(&config).map_err(|e| e.to_string())?);
    let manager = ConnectionManager::from_config(&config, Arc::clone(&bus)).map_err(|e| e.to_string())?;

    let notifications = NotificationStore::mount(Arc::clone(&bus), api.clone()).await;
    let saved = SavedRecordStore::mount(Arc::clone(&bus), api.clone()).await;
    let listings = ListingStore::mount(Arc::clone(&bus), api.clone()).await;
    info!(
        notifications = notifications.notifications().len(),
        unread = notifications.unread_count(),
        saved = saved.records().len(),
        unseen = saved.unseen_count(),
        listings = listings.len(),
        "stores ready"
    );

    manager.connect();
    if let Some(user_id) = &config.user_id {
        manager.authenticate(user_id.clone());
    }

    let mut status = manager.watch_status();
    let mut notification_changes = notifications.changes();
    let mut saved_changes = saved.changes();
    let mut listing_changes = listings.changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            Ok(()) = status.changed() => {
                let current = status.borrow_and_update().clone();
                info!(
                    state = %current.state,
                    session_id = current.session_id.as_deref().unwrap_or("-"),
                    attempts = current.attempts,
                    exhausted = current.exhausted,
                    "connection status"
                );
            }
            Ok(()) = notification_changes.changed() => {
                notification_changes.borrow_and_update();
                for toast in notifications.toasts() {
                    info!(key = %toast.key, "{}", toast.message);
                    notifications.dismiss_toast(&toast.key);
                }
                info!(unread = notifications.unread_count(), "notifications changed");
            }
            Ok(()) = saved_changes.changed() => {
                saved_changes.borrow_and_update();
                info!(unseen = saved.unseen_count(), "saved records changed");
            }
            Ok(()) = listing_changes.changed() => {
                listing_changes.borrow_and_update();
                info!(items = listings.len(), "listing changed");
            }
        }
    }

    notifications.unmount();
    saved.unmount();
    listings.unmount();
    manager.disconnect().await;
    Ok(())
}
