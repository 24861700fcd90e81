//! Capacity monitor: background size check against the capacity ceiling
//!
//! Each tick measures the serialized size of the in-memory store:
//!
//! - below the warning threshold: nothing happens
//! - at or above warning, below critical: a warning is logged
//! - at or above critical: expired entries are purged
//!
//! The purge is pressure relief only. Refusing writes that would overflow
//! the ceiling is done synchronously by `Store::create`, because a tick is
//! far too coarse to stop overshoot.
//!
//! The monitor only starts when `Store::start_monitor` is called and stops
//! when its [`MonitorHandle`] is shut down or dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{StashError, StashResult};
use crate::store::Shared;

/// Longest the loop sleeps before re-checking the stop signal
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Where the store sits relative to its capacity ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLevel {
    Normal,
    Warning,
    Critical,
}

/// Classify `size` against `ceiling` using fractional thresholds.
pub fn classify(size: u64, ceiling: u64, warning: f64, critical: f64) -> CapacityLevel {
    if ceiling == 0 {
        return CapacityLevel::Critical;
    }
    let ratio = size as f64 / ceiling as f64;
    if ratio >= critical {
        CapacityLevel::Critical
    } else if ratio >= warning {
        CapacityLevel::Warning
    } else {
        CapacityLevel::Normal
    }
}

/// Counters updated by the monitor thread.
#[derive(Debug, Default)]
pub struct MonitorStats {
    ticks: AtomicU64,
    warnings: AtomicU64,
    cleanups: AtomicU64,
    purged: AtomicU64,
}

impl MonitorStats {
    /// Total checks completed
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Checks that landed in the warning band
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Checks that triggered an expiry purge
    pub fn cleanups(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }

    /// Entries removed by monitor-triggered purges
    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }
}

/// Handle to a running capacity monitor thread.
/// Dropping this handle signals the thread to stop and waits for it.
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    stats: Arc<MonitorStats>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Request shutdown and wait for the background thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Check if the monitor thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the monitor thread for `shared`.
pub(crate) fn start_monitor(shared: Arc<Shared>) -> StashResult<MonitorHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(MonitorStats::default());

    let thread_shutdown = Arc::clone(&shutdown);
    let thread_stats = Arc::clone(&stats);

    let thread = thread::Builder::new()
        .name("jsonstash-monitor".to_string())
        .spawn(move || monitor_loop(shared, thread_stats, thread_shutdown))
        .map_err(|e| StashError::Persistence {
            path: None,
            kind: e.kind(),
            message: format!("Failed to spawn monitor thread: {}", e),
        })?;

    Ok(MonitorHandle {
        shutdown,
        stats,
        thread: Some(thread),
    })
}

fn monitor_loop(shared: Arc<Shared>, stats: Arc<MonitorStats>, shutdown: Arc<AtomicBool>) {
    let interval = shared.config.monitor_interval;
    info!(interval_ms = interval.as_millis() as u64, "capacity monitor started");

    loop {
        // An interval too large to represent as an Instant never elapses.
        let wake_time = Instant::now().checked_add(interval);
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!(ticks = stats.ticks(), "capacity monitor stopped");
                return;
            }
            let step = match wake_time {
                Some(wake_time) => {
                    let remaining = wake_time.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    remaining.min(SHUTDOWN_POLL)
                }
                None => SHUTDOWN_POLL,
            };
            thread::sleep(step);
        }

        if let Err(e) = check_capacity(&shared, &stats) {
            error!(error = %e, "capacity check failed");
        }
    }
}

/// Run one monitor tick against the store.
pub(crate) fn check_capacity(shared: &Shared, stats: &MonitorStats) -> StashResult<CapacityLevel> {
    let size = shared.serialized_size()?;
    let ceiling = shared.config.capacity_ceiling();
    let level = classify(
        size,
        ceiling,
        shared.config.warning_threshold,
        shared.config.critical_threshold,
    );
    stats.ticks.fetch_add(1, Ordering::Relaxed);

    match level {
        CapacityLevel::Normal => {
            debug!(size, ceiling, "capacity normal");
        }
        CapacityLevel::Warning => {
            stats.warnings.fetch_add(1, Ordering::Relaxed);
            warn!(size, ceiling, "store is approaching its capacity ceiling");
        }
        CapacityLevel::Critical => {
            stats.cleanups.fetch_add(1, Ordering::Relaxed);
            warn!(size, ceiling, "store is at critical capacity, purging expired entries");
            let removed = shared.cleanup_expired()?;
            stats.purged.fetch_add(removed as u64, Ordering::Relaxed);
            if removed == 0 {
                warn!(size, ceiling, "critical capacity and nothing expired to purge");
            }
        }
    }

    Ok(level)
}
