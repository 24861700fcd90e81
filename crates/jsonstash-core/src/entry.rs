//! Stored entries and the clock that dates them.
//!
//! Expiry is an absolute wall-clock timestamp in seconds since the Unix
//! epoch, which is also what lands in the backing file. Wall-clock time is
//! the accepted trade-off: a host clock stepping backwards can delay expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One stored value plus its optional expiry.
///
/// Entries are never mutated in place; replacing a value means removing
/// the entry and inserting a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    value: Value,
    #[serde(default)]
    expiry: Option<f64>,
}

impl Entry {
    /// Creates a new entry with the given value and expiration time
    pub fn new(value: Value, expiry: Option<f64>) -> Self {
        Self { value, expiry }
    }

    /// Builds an entry expiring `ttl_secs` after `now`.
    ///
    /// A TTL of zero means the entry never expires.
    pub fn with_ttl(value: Value, ttl_secs: Option<u64>, now: f64) -> Self {
        let expiry = match ttl_secs {
            Some(0) | None => None,
            Some(ttl) => Some(now + ttl as f64),
        };
        Self::new(value, expiry)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Absolute expiry in seconds since the epoch, if any
    pub fn expiry(&self) -> Option<f64> {
        self.expiry
    }

    /// True once `now` is strictly past the expiry instant.
    pub fn is_expired_at(&self, now: f64) -> bool {
        match self.expiry {
            Some(expiry) => now > expiry,
            None => false,
        }
    }
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now(&self) -> f64;
}

/// Host wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to. Used to test expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { bits: AtomicU64::new(start.to_bits()) }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.set(self.now() + by.as_secs_f64());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
