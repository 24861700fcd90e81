//! Platform-specific durable sync implementations
//!
//! Saving the store replaces the backing file through a rename, so both the
//! new file and the directory entry pointing at it must reach persistent
//! storage before a save reports success.

use std::fs::File;
use std::io;
use std::path::Path;

/// Ensures data is durably written to persistent storage before returning.
///
/// Platform behaviors:
/// - Linux: fdatasync()
/// - macOS/iOS: fcntl(F_FULLFSYNC), bypasses the drive's volatile cache
/// - Windows: FlushFileBuffers()
/// - Other: file.sync_data()
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fdatasync operates on a descriptor borrowed from a live File.
        let result = unsafe { libc::fdatasync(fd) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: F_FULLFSYNC on a descriptor borrowed from a live File.
        let result = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        let handle = file.as_raw_handle();
        // SAFETY: FlushFileBuffers on a handle borrowed from a live File.
        let result = unsafe { FlushFileBuffers(handle as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}

/// Persist a rename inside `dir` by syncing the directory itself.
///
/// Windows cannot open directories as files; NTFS journals the rename and
/// there is nothing further to do.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir)?;
        durable_sync(&handle)
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
