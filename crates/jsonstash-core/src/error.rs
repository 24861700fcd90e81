//! Error types for JsonStash operations
//!
//! Every failure the store can report is a variant of [`StashError`]. Callers
//! branch on the variant; the `Display` text is for humans only.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// JsonStash error types with the offending key or size attached
#[derive(Debug, Clone, PartialEq)]
pub enum StashError {
    /// A live entry already exists under this key
    KeyExists {
        /// The rejected key
        key: String,
    },

    /// No live entry exists under this key
    KeyNotFound {
        /// The missing key
        key: String,
    },

    /// Key is longer than the configured maximum
    KeyTooLong {
        /// The rejected key
        key: String,
        /// Length of the key in characters
        length: usize,
        /// Configured maximum length
        max: usize,
    },

    /// Serialized value is larger than the configured maximum
    ValueTooLarge {
        /// Key the value was destined for
        key: String,
        /// Serialized size of the value in bytes
        size: usize,
        /// Configured maximum size in bytes
        max: usize,
    },

    /// The backing file could not be parsed.
    ///
    /// By the time this is returned the corrupt file has been moved to
    /// `backup` and an empty document has been written in its place.
    InvalidPersistedData {
        /// The backing file that failed to parse
        path: PathBuf,
        /// Where the original bytes were moved
        backup: PathBuf,
        /// Parser diagnostic
        reason: String,
    },

    /// Whole-store size would exceed the capacity ceiling even after
    /// purging expired entries
    CapacityExceeded {
        /// Key whose insertion was refused
        key: String,
        /// Serialized size the store would have had
        required_bytes: u64,
        /// Capacity ceiling in bytes
        limit_bytes: u64,
    },

    /// Batch holds more pairs than the configured limit
    BatchLimitExceeded {
        /// Number of pairs submitted
        count: usize,
        /// Configured batch limit
        limit: usize,
    },

    /// I/O or serialization failure while loading or saving
    Persistence {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// The cross-process file lock could not be acquired in time
    LockTimeout {
        /// The lock file
        path: PathBuf,
        /// How long we waited before giving up
        waited: Duration,
    },

    /// Configuration rejected by `Config::validate`
    InvalidConfig {
        /// Which constraint was violated
        reason: String,
    },
}

impl StashError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error, context: &str) -> Self {
        StashError::Persistence {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }

    /// True for the errors raised before any mutation is attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StashError::KeyTooLong { .. }
                | StashError::ValueTooLarge { .. }
                | StashError::BatchLimitExceeded { .. }
        )
    }
}

impl fmt::Display for StashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StashError::KeyExists { key } => write!(f, "Key '{}' already exists", key),

            StashError::KeyNotFound { key } => write!(f, "Key '{}' not found", key),

            StashError::KeyTooLong { key, length, max } => {
                write!(f, "Key '{}' is {} characters, exceeds maximum of {}", key, length, max)
            }

            StashError::ValueTooLarge { key, size, max } => {
                write!(f, "Value for key '{}' is {} bytes, exceeds maximum of {} bytes",
                       key, size, max)
            }

            StashError::InvalidPersistedData { path, backup, reason } => {
                write!(f, "Invalid data in {} (moved to {}): {}",
                       path.display(), backup.display(), reason)
            }

            StashError::CapacityExceeded { key, required_bytes, limit_bytes } => {
                write!(f, "Capacity exceeded inserting '{}': {} bytes required, limit {} bytes",
                       key, required_bytes, limit_bytes)
            }

            StashError::BatchLimitExceeded { count, limit } => {
                write!(f, "Batch of {} pairs exceeds limit of {}", count, limit)
            }

            StashError::Persistence { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "Persistence error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "Persistence error: {} ({})", message, kind)
                }
            }

            StashError::LockTimeout { path, waited } => {
                write!(f, "Timed out after {:?} waiting for lock on {}", waited, path.display())
            }

            StashError::InvalidConfig { reason } => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl Error for StashError {}

/// Convert std::io::Error to StashError::Persistence
impl From<std::io::Error> for StashError {
    fn from(err: std::io::Error) -> Self {
        StashError::Persistence {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Serialization failures surface as persistence errors
impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        StashError::Persistence {
            path: None,
            kind: std::io::ErrorKind::InvalidData,
            message: format!("JSON serialization failed: {}", err),
        }
    }
}

/// Result type alias for JsonStash operations
pub type StashResult<T> = Result<T, StashError>;
