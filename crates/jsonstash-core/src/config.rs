//! Configuration for a JsonStash store
//!
//! All limits are fixed at construction time. Nothing here reads the
//! environment; the embedding process decides where values come from.

use std::path::PathBuf;
use std::time::Duration;

/// Default maximum key length in characters
pub const DEFAULT_MAX_KEY_LENGTH: usize = 32;
/// Default maximum serialized value size (16 KiB)
pub const DEFAULT_MAX_VALUE_SIZE: usize = 16 * 1024;
/// Default hard file-size limit (1 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;
/// Default number of pairs accepted by one batch
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// JsonStash configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing file holding the whole store as one JSON document
    pub path: PathBuf,
    /// Cadence of the background capacity monitor
    pub monitor_interval: Duration,
    /// Maximum key length in characters
    pub max_key_length: usize,
    /// Maximum serialized value size in bytes.
    ///
    /// Measured as the UTF-8 length of the compact JSON encoding, so a
    /// non-ASCII character counts once per byte and no separator spaces
    /// are included.
    pub max_value_size: usize,
    /// Hard file-size limit in bytes
    pub max_file_size: u64,
    /// Fraction of `max_file_size` the serialized store may occupy
    pub capacity_ratio: f64,
    /// Fraction of the capacity ceiling at which the monitor warns
    pub warning_threshold: f64,
    /// Fraction of the capacity ceiling at which the monitor purges expired entries
    pub critical_threshold: f64,
    /// Maximum pairs per batch
    pub batch_limit: usize,
    /// Bounded wait for the cross-process lock; `None` waits forever
    pub lock_timeout: Option<Duration>,
    /// Extra save attempts after a failed write
    pub save_retries: u32,
    /// Pause between save attempts
    pub retry_backoff: Duration,
}

impl Config {
    /// Default configuration rooted at the given backing file.
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            monitor_interval: Duration::from_secs(30),
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            capacity_ratio: 0.9,
            warning_threshold: 0.9,
            critical_threshold: 0.98,
            batch_limit: DEFAULT_BATCH_LIMIT,
            lock_timeout: Some(Duration::from_secs(10)),
            save_retries: 0,
            retry_backoff: Duration::from_millis(50),
        }
    }

    /// `~/Documents/data_store.json`, or `./data_store.json` when no home
    /// directory can be determined.
    pub fn default_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join("Documents").join("data_store.json"),
            None => PathBuf::from("data_store.json"),
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Retry a failed save `retries` more times, sleeping `backoff` in between.
    pub fn with_save_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.save_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Serialized-size ceiling the store must stay under.
    pub fn capacity_ceiling(&self) -> u64 {
        (self.max_file_size as f64 * self.capacity_ratio) as u64
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path must not be empty".into());
        }
        if self.monitor_interval.is_zero() {
            return Err("monitor_interval must be > 0".into());
        }
        if self.max_key_length == 0 {
            return Err("max_key_length must be > 0".into());
        }
        if self.max_value_size == 0 {
            return Err("max_value_size must be > 0".into());
        }
        if self.max_file_size == 0 {
            return Err("max_file_size must be > 0".into());
        }
        // Written as negated ranges so NaN is rejected too.
        if !(self.capacity_ratio > 0.0 && self.capacity_ratio <= 1.0) {
            return Err("capacity_ratio must be in (0.0, 1.0]".into());
        }
        if !(self.critical_threshold > 0.0 && self.critical_threshold <= 1.0) {
            return Err("critical_threshold must be in (0.0, 1.0]".into());
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= self.critical_threshold) {
            return Err("warning_threshold must be in (0.0, critical_threshold]".into());
        }
        if self.batch_limit == 0 {
            return Err("batch_limit must be > 0".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::at(Self::default_path())
    }
}
