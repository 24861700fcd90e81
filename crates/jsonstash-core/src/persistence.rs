//! Whole-document persistence for the store.
//!
//! The store is one JSON object mapping each key to
//! `{"value": <any JSON>, "expiry": <epoch seconds> | null}`. It is never
//! appended to; every save replaces the whole file.
//!
//! Save uses the atomic rename pattern:
//! 1. Take the cross-process lock on `<path>.lock`
//! 2. Write the full document to `<path>.tmp` (created fresh, truncated)
//! 3. durable_sync the temp file
//! 4. Rename temp file over `<path>`
//! 5. Sync the parent directory
//!
//! A failure at any step leaves the previous document in place.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::entry::Entry;
use crate::error::{StashError, StashResult};
use crate::file_lock::FileLock;
use crate::platform_durability::{durable_sync, sync_dir};

/// In-memory form of the persisted document
pub type Document = HashMap<String, Entry>;

/// Serialize a document exactly as it is written to disk.
pub fn encode(document: &Document) -> StashResult<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Reads and writes the backing file.
#[derive(Debug, Clone)]
pub struct Persistence {
    path: PathBuf,
    lock_path: PathBuf,
    temp_path: PathBuf,
    backup_path: PathBuf,
    lock_timeout: Option<Duration>,
    retries: u32,
    backoff: Duration,
}

impl Persistence {
    pub fn new(config: &Config) -> Self {
        let path = config.path.clone();
        Self {
            lock_path: with_suffix(&path, ".lock"),
            temp_path: with_suffix(&path, ".tmp"),
            backup_path: with_suffix(&path, ".backup"),
            path,
            lock_timeout: config.lock_timeout,
            retries: config.save_retries,
            backoff: config.retry_backoff,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a corrupt document is moved on load
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Load the document.
    ///
    /// - Missing file: an empty document is written and returned.
    /// - Unparseable file: the file is moved to `<path>.backup` (replacing
    ///   any earlier backup), an empty document is written in its place, and
    ///   `StashError::InvalidPersistedData` is returned.
    pub fn load(&self) -> StashResult<Document> {
        self.ensure_parent()?;
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "store file not found, creating empty store");
                let empty = Document::new();
                self.write_document(&encode(&empty)?)?;
                return Ok(empty);
            }
            Err(e) => return Err(StashError::io(&self.path, e, "Failed to read store file")),
        };

        match serde_json::from_slice::<Document>(&bytes) {
            Ok(document) => {
                info!(path = %self.path.display(), entries = document.len(), "store loaded");
                Ok(document)
            }
            Err(parse_err) => {
                error!(
                    path = %self.path.display(),
                    backup = %self.backup_path.display(),
                    error = %parse_err,
                    "store file is corrupt, moving it aside and starting empty"
                );
                fs::rename(&self.path, &self.backup_path).map_err(|e| {
                    StashError::io(&self.backup_path, e, "Failed to back up corrupt store file")
                })?;
                self.write_document(&encode(&Document::new())?)?;
                Err(StashError::InvalidPersistedData {
                    path: self.path.clone(),
                    backup: self.backup_path.clone(),
                    reason: parse_err.to_string(),
                })
            }
        }
    }

    /// Serialize and save the whole document.
    pub fn save(&self, document: &Document) -> StashResult<()> {
        self.save_bytes(&encode(document)?)
    }

    /// Save an already-encoded document, retrying per configuration.
    pub fn save_bytes(&self, bytes: &[u8]) -> StashResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.save_once(bytes) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "save failed, retrying"
                    );
                    thread::sleep(self.backoff);
                }
                Err(e) => {
                    error!(
                        path = %self.path.display(),
                        attempts = attempt + 1,
                        error = %e,
                        "save failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn save_once(&self, bytes: &[u8]) -> StashResult<()> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        self.write_document(bytes)
    }

    fn ensure_parent(&self) -> StashResult<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
                .map_err(|e| StashError::io(parent, e, "Failed to create store directory")),
            _ => Ok(()),
        }
    }

    /// Replace the backing file with `bytes`. Caller holds the file lock.
    fn write_document(&self, bytes: &[u8]) -> StashResult<()> {
        let result = self.write_temp(bytes).and_then(|()| {
            fs::rename(&self.temp_path, &self.path)
                .map_err(|e| StashError::io(&self.path, e, "Failed to replace store file"))
        });

        if result.is_err() {
            // Best effort; a leftover temp file is overwritten by the next save.
            let _ = fs::remove_file(&self.temp_path);
            return result;
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            sync_dir(parent)
                .map_err(|e| StashError::io(parent, e, "Failed to sync store directory"))?;
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "store saved");
        Ok(())
    }

    fn write_temp(&self, bytes: &[u8]) -> StashResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| StashError::io(&self.temp_path, e, "Failed to create temp file"))?;

        file.write_all(bytes)
            .map_err(|e| StashError::io(&self.temp_path, e, "Failed to write store document"))?;

        durable_sync(&file)
            .map_err(|e| StashError::io(&self.temp_path, e, "Failed to sync store document"))
    }
}
