use facevault_core::ValidationError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to a persistence backend.
///
/// "Key does not exist" is never a `StorageError`; backends report it as an
/// absent value.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} returned HTTP {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("invalid key {0:?}: must be a single non-empty name of [A-Za-z0-9._-]")]
    InvalidKey(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("backend task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Timeout { .. } => true,
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            StorageError::Http { source, .. } => source.is_timeout() || source.is_connect(),
            StorageError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            StorageError::Database(tokio_rusqlite::Error::Rusqlite(
                rusqlite::Error::SqliteFailure(e, _),
            )) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StorageError::Database(_)
            | StorageError::InvalidKey(_)
            | StorageError::MalformedPayload(_)
            | StorageError::Task(_) => false,
        }
    }
}

/// Outcome of a representation store operation that did not succeed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("username already enrolled: {0}")]
    DuplicateUsername(String),
    #[error("username not enrolled: {0}")]
    NotFound(String),
    /// The read half failed; storage was not touched.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The write half failed after validation; the persisted state is
    /// unknown and should be re-listed.
    #[error("write outcome unknown, list the collection to confirm: {0}")]
    Indeterminate(#[source] StorageError),
    #[error("stored collection is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Storage(e) | StoreError::Indeterminate(e) => e.is_retryable(),
            _ => false,
        }
    }
}
