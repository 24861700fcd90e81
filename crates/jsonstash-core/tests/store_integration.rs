//! Integration tests: the store end to end against real files.
//!
//! These exercise persistence across reopen, corrupt-file recovery, the
//! background monitor, and concurrent callers.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use jsonstash_core::file_lock::FileLock;
use jsonstash_core::{
    BatchStatus, Config, ManualClock, ReadOutcome, StashError, Store, SystemClock,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(dir: &TempDir) -> Config {
    Config::at(dir.path().join("data_store.json"))
}

fn open_manual(dir: &TempDir, start: f64) -> (Store, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let store = Store::open_with_clock(config(dir), clock.clone()).unwrap();
    (store, clock)
}

// ---------------------------------------------------------------------------
// Round trip and persistence
// ---------------------------------------------------------------------------

#[test]
fn test_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let nested = json!({"name": "value1", "tags": ["a", "b"], "n": 3, "ok": true, "none": null});
    {
        let (store, _clock) = open_manual(&dir, 1_000.0);
        store.create("key1", nested.clone(), Some(60)).unwrap();
        store.create("key2", json!("plain"), None).unwrap();
        store.create("doomed", json!(0), None).unwrap();
        store.delete("doomed").unwrap();
    }
    {
        let (store, _clock) = open_manual(&dir, 1_030.0);
        assert_eq!(store.read("key1").unwrap(), ReadOutcome::Found(nested));
        assert_eq!(store.read("key2").unwrap(), ReadOutcome::Found(json!("plain")));
        assert_eq!(store.read("doomed").unwrap(), ReadOutcome::NotFound);
        assert_eq!(store.len(), 2);
    }
}

#[test]
fn test_expiry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let (store, _clock) = open_manual(&dir, 1_000.0);
        store.create("ttl", json!(1), Some(10)).unwrap();
    }
    let (store, _clock) = open_manual(&dir, 1_011.0);
    assert_eq!(store.read("ttl").unwrap(), ReadOutcome::Expired);

    let (reopened, _clock) = open_manual(&dir, 1_011.0);
    assert_eq!(reopened.read("ttl").unwrap(), ReadOutcome::NotFound);
}

#[test]
fn test_on_disk_format() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = open_manual(&dir, 1_000.0);
    store.create("k", json!({"a": 1}), Some(5)).unwrap();
    store.create("p", json!([1]), None).unwrap();

    let text = fs::read_to_string(store.path()).unwrap();
    let doc: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["k"], json!({"value": {"a": 1}, "expiry": 1005.0}));
    assert_eq!(doc["p"], json!({"value": [1], "expiry": null}));
}

#[test]
fn test_reads_file_written_elsewhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data_store.json");
    let legacy = json!({
        "legacy": {"value": {"name": "x"}, "expiry": null},
        "old": {"value": 1, "expiry": 10.5}
    });
    fs::write(&path, legacy.to_string()).unwrap();

    let (store, _clock) = open_manual(&dir, 1_000.0);
    assert_eq!(store.read("legacy").unwrap(), ReadOutcome::Found(json!({"name": "x"})));
    assert_eq!(store.read("old").unwrap(), ReadOutcome::Expired);
}

// ---------------------------------------------------------------------------
// Corrupt file recovery
// ---------------------------------------------------------------------------

#[test]
fn test_corrupt_file_strict_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data_store.json");
    let garbage = b"{\"key1\": {\"value\": 1, \"expi".to_vec();
    fs::write(&path, &garbage).unwrap();

    match Store::open(config(&dir)) {
        Err(StashError::InvalidPersistedData { backup, .. }) => {
            assert_eq!(fs::read(&backup).unwrap(), garbage);
        }
        other => panic!("Expected InvalidPersistedData, got {:?}", other),
    }

    // The reset file is a valid empty store.
    let store = Store::open(config(&dir)).unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_corrupt_file_recovering_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data_store.json");
    fs::write(&path, b"\xff\xfe binary junk").unwrap();

    let (store, recovered) = Store::open_or_recover(config(&dir), Arc::new(SystemClock)).unwrap();
    assert!(matches!(recovered, Some(StashError::InvalidPersistedData { .. })));
    assert!(store.is_empty());

    store.create("after", json!("recovery"), None).unwrap();
    assert_eq!(store.read("after").unwrap(), ReadOutcome::Found(json!("recovery")));

    let backup = dir.path().join("data_store.json.backup");
    assert_eq!(fs::read(backup).unwrap(), b"\xff\xfe binary junk");
}

#[test]
fn test_wrong_shape_is_corrupt() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data_store.json"), b"[1, 2, 3]").unwrap();

    let (_store, recovered) = Store::open_or_recover(config(&dir), Arc::new(SystemClock)).unwrap();
    assert!(matches!(recovered, Some(StashError::InvalidPersistedData { .. })));
}

// ---------------------------------------------------------------------------
// Expiry against the real clock
// ---------------------------------------------------------------------------

#[test]
fn test_one_second_ttl_wall_clock() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(config(&dir)).unwrap();

    store.create("short", json!("lived"), Some(1)).unwrap();
    assert_eq!(store.read("short").unwrap(), ReadOutcome::Found(json!("lived")));

    thread::sleep(Duration::from_millis(1_100));
    assert_eq!(store.read("short").unwrap(), ReadOutcome::Expired);
    assert_eq!(store.read("short").unwrap(), ReadOutcome::NotFound);
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[test]
fn test_batch_collects_mixed_failures() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = open_manual(&dir, 1_000.0);
    store.create("taken", json!(0), None).unwrap();

    let long_key = "k".repeat(40);
    let report = store
        .batch_create(
            vec![
                ("fresh".to_string(), json!(1)),
                ("taken".to_string(), json!(2)),
                (long_key.clone(), json!(3)),
                ("big".to_string(), json!("z".repeat(20_000))),
            ],
            None,
        )
        .unwrap();

    assert_eq!(report.status(), BatchStatus::Partial);
    assert_eq!(report.succeeded, vec!["fresh".to_string()]);
    assert_eq!(report.failed.len(), 3);
    assert!(matches!(report.failed["taken"], StashError::KeyExists { .. }));
    assert!(matches!(report.failed[&long_key], StashError::KeyTooLong { .. }));
    assert!(matches!(report.failed["big"], StashError::ValueTooLarge { .. }));
}

#[test]
fn test_batch_at_limit_accepted() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = open_manual(&dir, 1_000.0);

    let pairs: Vec<(String, Value)> = (0..100).map(|i| (format!("k{:03}", i), json!(i))).collect();
    let report = store.batch_create(pairs, None).unwrap();
    assert_eq!(report.status(), BatchStatus::AllSucceeded);
    assert_eq!(store.len(), 100);
}

#[test]
fn test_batch_over_limit_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let (store, _clock) = open_manual(&dir, 1_000.0);
    let before = fs::read(store.path()).unwrap();

    let pairs: Vec<(String, Value)> = (0..101).map(|i| (format!("k{:03}", i), json!(i))).collect();
    assert!(matches!(
        store.batch_create(pairs, None),
        Err(StashError::BatchLimitExceeded { count: 101, limit: 100 })
    ));
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Background monitor
// ---------------------------------------------------------------------------

#[test]
fn test_monitor_purges_at_critical_capacity() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000.0));
    let config = config(&dir)
        .with_max_file_size(1_000)
        .with_monitor_interval(Duration::from_millis(20));
    let store = Store::open_with_clock(config, clock.clone()).unwrap();

    store.create("bulk", json!("x".repeat(850)), Some(1)).unwrap();
    clock.advance(Duration::from_secs(2));

    let monitor = store.start_monitor().unwrap();
    let stats = monitor.stats();
    for _ in 0..100 {
        if store.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    monitor.shutdown();

    assert!(store.is_empty());
    assert!(stats.cleanups() >= 1);
    assert_eq!(stats.purged(), 1);
}

#[test]
fn test_monitor_stops_when_handle_dropped() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(config(&dir).with_monitor_interval(Duration::from_millis(10))).unwrap();

    let stats = {
        let monitor = store.start_monitor().unwrap();
        thread::sleep(Duration::from_millis(80));
        monitor.stats()
    };
    let ticks = stats.ticks();
    assert!(ticks >= 1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stats.ticks(), ticks);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_creates_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(config(&dir)).unwrap();

    let mut handles = vec![];
    for t in 0..4 {
        let s = store.clone();
        handles.push(thread::spawn(move || {
            for i in 0..10 {
                s.create(&format!("t{}-{}", t, i), json!(i), None).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len(), 40);
    let reopened = Store::open(config(&dir)).unwrap();
    assert_eq!(reopened.len(), 40);
}

#[test]
fn test_concurrent_create_same_key_single_winner() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(config(&dir)).unwrap();

    let mut handles = vec![];
    for t in 0..8 {
        let s = store.clone();
        handles.push(thread::spawn(move || s.create("contested", json!(t), None).is_ok()));
    }
    let winners = handles.into_iter().filter_map(|h| h.join().ok()).filter(|won| *won).count();
    assert_eq!(winners, 1);
}

#[test]
fn test_save_times_out_while_another_process_holds_lock() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir).with_lock_timeout(Some(Duration::from_millis(50)));
    let store = Store::open(config).unwrap();

    let lock_path = dir.path().join("data_store.json.lock");
    let held = FileLock::acquire(&lock_path, None).unwrap();

    match store.create("blocked", json!(1), None) {
        Err(StashError::LockTimeout { .. }) => {}
        other => panic!("Expected LockTimeout, got {:?}", other),
    }
    assert!(!store.contains_live("blocked"));

    drop(held);
    store.create("blocked", json!(1), None).unwrap();
}
