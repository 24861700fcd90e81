//! Core store: the public API of JsonStash.
//!
//! `Store` owns the in-memory map and serializes every operation through one
//! exclusive mutex. The mutex is held across the save of each mutation, so a
//! single create, delete or expiring read is atomic end to end. Lock order
//! on every mutating path is: store mutex, then the cross-process file lock
//! (taken inside `Persistence`).
//!
//! Every mutation is persisted before success is returned. If the save
//! fails, the mutation is undone in memory and the error is returned, so
//! memory never runs ahead of disk for a caller-visible failure.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::entry::{Clock, Entry, SystemClock};
use crate::error::{StashError, StashResult};
use crate::expiry;
use crate::monitor::{self, CapacityLevel, MonitorHandle};
use crate::persistence::{encode, Document, Persistence};

/// Result of [`Store::read`]. Expired is distinct from never-existed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// No entry under this key
    NotFound,
    /// The entry had lapsed; it has now been removed and the removal persisted
    Expired,
    /// Live entry
    Found(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    AllSucceeded,
    Partial,
}

/// Per-key outcome of [`Store::batch_create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Keys created, in submission order
    pub succeeded: Vec<String>,
    /// Keys that failed and why
    pub failed: BTreeMap<String, StashError>,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        if self.failed.is_empty() {
            BatchStatus::AllSucceeded
        } else {
            BatchStatus::Partial
        }
    }
}

/// State shared between store handles and the monitor thread.
pub(crate) struct Shared {
    pub(crate) data: Mutex<Document>,
    pub(crate) persistence: Persistence,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Config,
}

impl Shared {
    /// Size of the in-memory store as it would be written to disk.
    pub(crate) fn serialized_size(&self) -> StashResult<u64> {
        let data = self.data.lock();
        Ok(encode(&data)?.len() as u64)
    }

    /// Purge all expired entries and persist once for the whole batch.
    pub(crate) fn cleanup_expired(&self) -> StashResult<usize> {
        let mut data = self.data.lock();
        let purged = expiry::purge_expired(&mut data, self.clock.now());
        if purged.is_empty() {
            debug!("no expired entries to purge");
            return Ok(0);
        }
        // Purged entries were already logically absent, so there is nothing
        // to roll back if this save fails.
        self.persistence.save(&data)?;
        info!(removed = purged.len(), "purged expired entries");
        Ok(purged.len())
    }
}

fn restore(data: &mut Document, key: &str, previous: Option<Entry>) {
    data.remove(key);
    if let Some(entry) = previous {
        data.insert(key.to_string(), entry);
    }
}

/// File-persisted key-value store.
///
/// Cloning is cheap and every clone operates on the same state. Opening a
/// store starts no background work; call [`Store::start_monitor`] for that.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("entries", &self.len())
            .finish()
    }
}

impl Store {
    /// Open the store at `config.path` using the wall clock.
    ///
    /// A corrupt backing file yields `StashError::InvalidPersistedData`
    /// after it has been backed up and reset; opening again then succeeds
    /// with an empty store. Use [`Store::open_or_recover`] to get that empty
    /// store in one step.
    pub fn open(config: Config) -> StashResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`Store::open`], with an explicit clock.
    pub fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> StashResult<Self> {
        match Self::open_or_recover(config, clock)? {
            (store, None) => Ok(store),
            (_, Some(err)) => Err(err),
        }
    }

    /// Open the store, continuing with an empty store if the backing file
    /// was corrupt. The recovery error, if any, is returned alongside.
    pub fn open_or_recover(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> StashResult<(Self, Option<StashError>)> {
        config.validate().map_err(|reason| StashError::InvalidConfig { reason })?;

        let persistence = Persistence::new(&config);
        let (data, recovered) = match persistence.load() {
            Ok(data) => (data, None),
            Err(err @ StashError::InvalidPersistedData { .. }) => (Document::new(), Some(err)),
            Err(err) => return Err(err),
        };

        let store = Self {
            shared: Arc::new(Shared {
                data: Mutex::new(data),
                persistence,
                clock,
                config,
            }),
        };
        Ok((store, recovered))
    }

    /// Start the background capacity monitor.
    ///
    /// The returned handle stops the monitor when shut down or dropped.
    pub fn start_monitor(&self) -> StashResult<MonitorHandle> {
        monitor::start_monitor(Arc::clone(&self.shared))
    }

    /// Create `key` with `value`, expiring `ttl_secs` from now if given.
    ///
    /// An expired entry still sitting under `key` is replaced rather than
    /// reported as `KeyExists`.
    pub fn create(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> StashResult<()> {
        self.validate_pair(key, &value)?;

        let mut data = self.shared.data.lock();
        let now = self.shared.clock.now();

        if let Some(existing) = data.get(key) {
            if !existing.is_expired_at(now) {
                return Err(StashError::KeyExists { key: key.to_string() });
            }
            debug!(key, "replacing expired entry");
        }

        let previous = data.insert(key.to_string(), Entry::with_ttl(value, ttl_secs, now));
        let limit = self.shared.config.capacity_ceiling();

        let mut bytes = match encode(&data) {
            Ok(bytes) => bytes,
            Err(e) => {
                restore(&mut data, key, previous);
                return Err(e);
            }
        };

        if bytes.len() as u64 > limit {
            let purged = expiry::purge_expired(&mut data, now);
            bytes = match encode(&data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    restore(&mut data, key, None);
                    return Err(e);
                }
            };

            if bytes.len() as u64 > limit {
                let required_bytes = bytes.len() as u64;
                data.remove(key);
                if !purged.is_empty() {
                    // The purged entries were already logically absent, so
                    // memory stays correct even if this save fails.
                    if let Err(e) = self.shared.persistence.save(&data) {
                        warn!(
                            removed = purged.len(),
                            error = %e,
                            "purge before capacity refusal was not persisted"
                        );
                    }
                }
                warn!(
                    key,
                    required_bytes,
                    limit_bytes = limit,
                    "capacity exceeded, create refused"
                );
                return Err(StashError::CapacityExceeded {
                    key: key.to_string(),
                    required_bytes,
                    limit_bytes: limit,
                });
            }
            info!(removed = purged.len(), "purged expired entries to make room");
        }

        self.commit_encoded(&mut data, &bytes, |data| restore(data, key, previous))?;
        debug!(key, ttl_secs = ?ttl_secs, "created");
        Ok(())
    }

    /// Look up `key`.
    ///
    /// Reading an expired entry removes it and persists the removal before
    /// returning `ReadOutcome::Expired`; this whole step runs under the store
    /// mutex.
    pub fn read(&self, key: &str) -> StashResult<ReadOutcome> {
        let mut data = self.shared.data.lock();
        let now = self.shared.clock.now();

        match data.get(key) {
            None => return Ok(ReadOutcome::NotFound),
            Some(entry) if !entry.is_expired_at(now) => {
                return Ok(ReadOutcome::Found(entry.value().clone()));
            }
            Some(_) => {}
        }

        let removed = data.remove(key);
        self.commit(&mut data, |data| restore(data, key, removed))?;
        debug!(key, "expired entry purged on read");
        Ok(ReadOutcome::Expired)
    }

    /// Delete a live entry. Absent and expired keys are `KeyNotFound`.
    pub fn delete(&self, key: &str) -> StashResult<()> {
        let mut data = self.shared.data.lock();
        let now = self.shared.clock.now();

        let live = data.get(key).map_or(false, |entry| !entry.is_expired_at(now));
        if !live {
            return Err(StashError::KeyNotFound { key: key.to_string() });
        }

        let removed = data.remove(key);
        self.commit(&mut data, |data| restore(data, key, removed))?;
        debug!(key, "deleted");
        Ok(())
    }

    /// Create many keys with a shared TTL, best effort.
    ///
    /// Only an oversized batch fails as a whole, before anything is written.
    /// Individual failures are collected in the report. The store mutex is
    /// taken per key, not for the whole batch.
    pub fn batch_create<I, K>(&self, pairs: I, ttl_secs: Option<u64>) -> StashResult<BatchReport>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let pairs: Vec<(String, Value)> = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let limit = self.shared.config.batch_limit;
        if pairs.len() > limit {
            warn!(count = pairs.len(), limit, "batch rejected");
            return Err(StashError::BatchLimitExceeded { count: pairs.len(), limit });
        }

        let mut report = BatchReport::default();
        for (key, value) in pairs {
            match self.create(&key, value, ttl_secs) {
                Ok(()) => report.succeeded.push(key),
                Err(e) => {
                    debug!(key = %key, error = %e, "batch item failed");
                    report.failed.insert(key, e);
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch create finished"
        );
        Ok(report)
    }

    /// Purge every expired entry, persisting once. Returns how many went.
    pub fn cleanup_expired(&self) -> StashResult<usize> {
        self.shared.cleanup_expired()
    }

    /// True if `key` holds an entry that has not expired.
    pub fn contains_live(&self, key: &str) -> bool {
        let data = self.shared.data.lock();
        let now = self.shared.clock.now();
        data.get(key).map_or(false, |entry| !entry.is_expired_at(now))
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.shared.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.lock().is_empty()
    }

    pub fn path(&self) -> &Path {
        self.shared.persistence.path()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Bytes the store occupies when serialized.
    pub fn serialized_size(&self) -> StashResult<u64> {
        self.shared.serialized_size()
    }

    pub fn capacity_ceiling(&self) -> u64 {
        self.shared.config.capacity_ceiling()
    }

    /// Current capacity band, computed the same way the monitor does.
    pub fn capacity_level(&self) -> StashResult<CapacityLevel> {
        let config = &self.shared.config;
        Ok(monitor::classify(
            self.serialized_size()?,
            config.capacity_ceiling(),
            config.warning_threshold,
            config.critical_threshold,
        ))
    }

    fn validate_pair(&self, key: &str, value: &Value) -> StashResult<()> {
        let config = &self.shared.config;

        let length = key.chars().count();
        if length > config.max_key_length {
            return Err(StashError::KeyTooLong {
                key: key.to_string(),
                length,
                max: config.max_key_length,
            });
        }

        let size = serde_json::to_vec(value)?.len();
        if size > config.max_value_size {
            return Err(StashError::ValueTooLarge {
                key: key.to_string(),
                size,
                max: config.max_value_size,
            });
        }
        Ok(())
    }

    fn commit<F>(&self, data: &mut Document, undo: F) -> StashResult<()>
    where
        F: FnOnce(&mut Document),
    {
        match encode(data) {
            Ok(bytes) => self.commit_encoded(data, &bytes, undo),
            Err(e) => {
                undo(data);
                Err(e)
            }
        }
    }

    /// Persist `bytes`; on failure run `undo` so memory matches disk again.
    fn commit_encoded<F>(&self, data: &mut Document, bytes: &[u8], undo: F) -> StashResult<()>
    where
        F: FnOnce(&mut Document),
    {
        if let Err(e) = self.shared.persistence.save_bytes(bytes) {
            undo(data);
            error!(
                path = %self.path().display(),
                error = %e,
                "save failed, in-memory mutation rolled back"
            );
            return Err(e);
        }
        Ok(())
    }
}
