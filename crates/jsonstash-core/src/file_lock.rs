//! Cross-process advisory lock on a sidecar lock file.
//!
//! The backing document is replaced by rename on every save, so the lock
//! lives on a separate `<path>.lock` file whose inode never changes. Only
//! processes that also take this lock are excluded.
//!
//! The in-process store mutex is always acquired before this lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{StashError, StashResult};

/// Polling step while waiting on a contended lock with a deadline
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock guard. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the exclusive lock on `path`, creating the file if needed.
    ///
    /// With `timeout = None` this blocks until the lock is granted. With a
    /// timeout, contention past the deadline yields `StashError::LockTimeout`.
    pub fn acquire(path: &Path, timeout: Option<Duration>) -> StashResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StashError::io(path, e, "Failed to open lock file"))?;

        match timeout {
            None => {
                sys::lock_blocking(&file)
                    .map_err(|e| StashError::io(path, e, "Failed to lock file"))?;
            }
            Some(timeout) => {
                let started = Instant::now();
                loop {
                    let acquired = sys::try_lock(&file)
                        .map_err(|e| StashError::io(path, e, "Failed to lock file"))?;
                    if acquired {
                        break;
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(StashError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
                }
            }
        }

        debug!(path = %path.display(), "acquired file lock");
        Ok(Self { file, path: path.to_path_buf() })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn flock(file: &File, op: libc::c_int) -> io::Result<()> {
        loop {
            // SAFETY: flock on a descriptor borrowed from a live File.
            let result = unsafe { libc::flock(file.as_raw_fd(), op) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    pub(super) fn lock_blocking(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_EX)
    }

    pub(super) fn try_lock(file: &File) -> io::Result<bool> {
        match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_UN)
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use std::os::windows::io::AsRawHandle;
    use winapi::shared::minwindef::DWORD;
    use winapi::shared::winerror::ERROR_LOCK_VIOLATION;
    use winapi::um::fileapi::{LockFileEx, UnlockFileEx};
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    fn lock(file: &File, flags: DWORD) -> io::Result<()> {
        // SAFETY: OVERLAPPED is plain data; zeroed means "offset 0".
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        // SAFETY: LockFileEx on a handle borrowed from a live File.
        let result = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                flags,
                0,
                DWORD::MAX,
                DWORD::MAX,
                &mut overlapped,
            )
        };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn lock_blocking(file: &File) -> io::Result<()> {
        lock(file, LOCKFILE_EXCLUSIVE_LOCK)
    }

    pub(super) fn try_lock(file: &File) -> io::Result<bool> {
        match lock(file, LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: OVERLAPPED is plain data; zeroed means "offset 0".
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        // SAFETY: UnlockFileEx on a handle borrowed from a live File.
        let result = unsafe {
            UnlockFileEx(
                file.as_raw_handle() as *mut _,
                0,
                DWORD::MAX,
                DWORD::MAX,
                &mut overlapped,
            )
        };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

// No advisory locking primitive; in-process exclusion still applies.
#[cfg(not(any(unix, windows)))]
mod sys {
    use super::*;

    pub(super) fn lock_blocking(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub(super) fn try_lock(_file: &File) -> io::Result<bool> {
        Ok(true)
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");
        let _lock = FileLock::acquire(&path, None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");
        {
            let _lock = FileLock::acquire(&path, Some(Duration::from_millis(50))).unwrap();
        }
        let again = FileLock::acquire(&path, Some(Duration::from_millis(50)));
        assert!(again.is_ok());
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn test_contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");
        let _held = FileLock::acquire(&path, None).unwrap();

        let started = Instant::now();
        let result = FileLock::acquire(&path, Some(Duration::from_millis(60)));
        match result {
            Err(StashError::LockTimeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(60));
            }
            other => panic!("Expected LockTimeout, got {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn test_waiter_proceeds_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");
        let held = FileLock::acquire(&path, None).unwrap();

        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            FileLock::acquire(&waiter_path, Some(Duration::from_secs(5))).map(|_| ())
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }
}
