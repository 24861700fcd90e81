//! Walkthrough of the JsonStash store: create, read, expire, delete, batch.
//!
//! Usage: `jsonstash-demo [PATH]` (defaults to `~/Documents/data_store.json`).
//! Log verbosity follows `RUST_LOG`.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use jsonstash_core::{Config, StashError, Store, SystemClock};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), StashError> {
    let path = std::env::args().nth(1).map(Into::into).unwrap_or_else(Config::default_path);
    let config = Config::at(path).with_monitor_interval(Duration::from_secs(5));

    let (store, recovered) = Store::open_or_recover(config, Arc::new(SystemClock))?;
    if let Some(e) = recovered {
        warn!(error = %e, "continuing with an empty store");
    }
    let monitor = store.start_monitor()?;
    info!(path = %store.path().display(), entries = store.len(), "store ready");

    // Leftovers from a previous run would turn the creates below into KeyExists.
    for key in ["key1", "key2", "key3", "key4"] {
        match store.delete(key) {
            Ok(()) | Err(StashError::KeyNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    store.create("key1", json!({"name": "value1"}), Some(2))?;
    info!(outcome = ?store.read("key1")?, "read key1");

    thread::sleep(Duration::from_secs(3));
    info!(outcome = ?store.read("key1")?, "read key1 after ttl");

    match store.delete("key1") {
        Err(StashError::KeyNotFound { .. }) => info!("key1 already gone"),
        other => other?,
    }

    store.create("key2", json!({"name": "value2"}), None)?;

    let report = store.batch_create(
        [("key3", json!({"name": "value3"})), ("key4", json!({"name": "value4"}))],
        Some(2),
    )?;
    info!(status = ?report.status(), succeeded = ?report.succeeded, "batch create");
    for (key, e) in &report.failed {
        if e.is_validation() {
            warn!(key = %key, error = %e, "batch pair rejected");
        } else {
            error!(key = %key, error = %e, "batch pair failed");
        }
    }

    info!(outcome = ?store.read("key3")?, "read key3");
    thread::sleep(Duration::from_secs(3));
    info!(outcome = ?store.read("key3")?, "read key3 after ttl");

    info!(removed = store.cleanup_expired()?, "cleanup");
    monitor.shutdown();
    Ok(())
}
