//! JsonStash Core: file-persisted JSON key-value store
//!
//! A single-node store that keeps its whole key space in memory and in one
//! JSON document on disk. Entries may carry a time-to-live; the store stays
//! under a capacity ceiling derived from a hard file-size limit.
//!
//! # Architecture
//!
//! - **Store**: one mutex serializes every operation; each mutation is
//!   persisted before it returns
//! - **Persistence**: whole-document load/save, atomic rename, cross-process
//!   advisory lock, corrupt-file backup
//! - **Expiry**: pure staleness checks plus a single-pass purge
//! - **Monitor**: optional background thread that warns near capacity and
//!   purges expired entries at critical capacity
//!
//! # Example
//!
//! ```rust,no_run
//! use jsonstash_core::{Config, ReadOutcome, Store};
//! use serde_json::json;
//!
//! let store = Store::open(Config::at("/tmp/data_store.json")).unwrap();
//! store.create("key1", json!({"name": "value1"}), Some(60)).unwrap();
//!
//! if let ReadOutcome::Found(value) = store.read("key1").unwrap() {
//!     println!("{}", value);
//! }
//!
//! let monitor = store.start_monitor().unwrap();
//! store.delete("key1").unwrap();
//! monitor.shutdown();
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
pub mod file_lock;
pub mod monitor;
pub mod persistence;
pub mod platform_durability;
pub mod store;

// Re-export key types for convenience
pub use config::Config;
pub use entry::{Clock, Entry, ManualClock, SystemClock};
pub use error::{StashError, StashResult};
pub use monitor::{CapacityLevel, MonitorHandle, MonitorStats};
pub use store::{BatchReport, BatchStatus, ReadOutcome, Store};
