//! Persistence backends.
//!
//! A backend stores opaque payloads under string keys. Reading a key that
//! was never written yields `Ok(None)`; only real failures (I/O, network,
//! database) are errors.

mod blob;
mod document;
mod flock;
mod local;

pub use blob::{CloudBlobBackend, CloudBlobConfig};
pub use document::DocumentStoreBackend;
pub use local::LocalFileBackend;

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which persistence technology a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "local")]
    LocalFile,
    #[serde(rename = "blob")]
    CloudBlob,
    #[serde(rename = "document")]
    DocumentStore,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::LocalFile => "local",
            BackendKind::CloudBlob => "blob",
            BackendKind::DocumentStore => "document",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(BackendKind::LocalFile),
            "blob" | "azure" => Ok(BackendKind::CloudBlob),
            "document" | "sqlite" => Ok(BackendKind::DocumentStore),
            other => Err(format!("unknown backend: {other} (expected local, blob or document)")),
        }
    }
}

/// Exclusive claim on a key, shared with every other process using the
/// same persistence location.
#[async_trait]
pub trait KeyLock: Send {
    async fn release(self: Box<Self>) -> Result<(), StorageError>;
}

/// Claim for a location no other process can reach.
pub struct ProcessLocal;

#[async_trait]
impl KeyLock for ProcessLocal {
    async fn release(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Put/get/drop over opaque payloads.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Wait until this process holds `key` exclusively. Callers bound the
    /// wait with their own deadline.
    async fn lock(&self, _key: &str) -> Result<Box<dyn KeyLock>, StorageError> {
        Ok(Box::new(ProcessLocal))
    }

    /// Store `payload` under `key`, replacing any previous value.
    async fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch the payload under `key`, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Drop the whole persistence location. Teardown only.
    async fn delete_container(&self) -> Result<(), StorageError>;
}

/// Startup selection of a backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    LocalFile { dir: PathBuf },
    CloudBlob(CloudBlobConfig),
    DocumentStore { path: PathBuf },
}

/// Construct the configured backend. Connection handles live as long as
/// the returned value.
pub async fn open_backend(
    config: &BackendConfig,
) -> Result<Arc<dyn PersistenceBackend>, StorageError> {
    let backend: Arc<dyn PersistenceBackend> = match config {
        BackendConfig::LocalFile { dir } => Arc::new(LocalFileBackend::new(dir)),
        BackendConfig::CloudBlob(cfg) => Arc::new(CloudBlobBackend::connect(cfg.clone()).await?),
        BackendConfig::DocumentStore { path } => Arc::new(DocumentStoreBackend::open(path).await?),
    };
    tracing::info!(backend = %backend.kind(), "persistence backend ready");
    Ok(backend)
}

/// Keys name a file, a blob or a collection, so they must be one plain
/// path component.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let plain = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Run one backend call under a deadline.
pub(crate) async fn bounded<T, F>(
    op: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, ?timeout, "backend call timed out");
            Err(StorageError::Timeout { op, timeout })
        }
    }
}
