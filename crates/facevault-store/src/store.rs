//! The enrolled collection as one logical resource.
//!
//! Every call reads the whole collection once. Mutations validate against
//! that snapshot and write the whole collection back once. A mutation holds
//! this process's mutex and the backend's cross-process lock from load until
//! its write settles, so two writers never observe the same prior state. A
//! write that outlives its deadline keeps both until it finishes.

use crate::backend::{bounded, BackendKind, KeyLock, PersistenceBackend};
use crate::error::{StorageError, StoreError};
use facevault_core::IdentityRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Well-known key of the persisted collection.
pub const DEFAULT_COLLECTION_KEY: &str = "representations";

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Key (file, blob or collection name) holding the collection.
    pub key: String,
    /// Deadline applied to every backend call, lock waits included.
    pub io_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_COLLECTION_KEY.to_string(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

pub struct RepresentationStore {
    backend: Arc<dyn PersistenceBackend>,
    options: StoreOptions,
    write_lock: Arc<Mutex<()>>,
}

/// Right to rewrite the collection.
struct WriteHold {
    _local: OwnedMutexGuard<()>,
    key_lock: Box<dyn KeyLock>,
}

impl WriteHold {
    async fn release(self) {
        if let Err(e) = self.key_lock.release().await {
            // Backend locks lapse on their own; the next writer waits it out.
            tracing::warn!(error = %e, "failed to release collection lock");
        }
    }
}

impl RepresentationStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Add `record`, rejecting a username that is already enrolled.
    ///
    /// A write failure after the duplicate check is reported as
    /// [`StoreError::Indeterminate`].
    pub async fn enroll(&self, record: IdentityRecord) -> Result<(), StoreError> {
        record.validate()?;
        let username = record.username.clone();

        let count = self
            .mutate(|records| {
                if records.iter().any(|r| r.username == record.username) {
                    tracing::info!(username = %record.username, "enroll rejected: duplicate username");
                    return Err(StoreError::DuplicateUsername(record.username));
                }
                records.push(record);
                Ok(records.len())
            })
            .await?;
        tracing::info!(username = %username, records = count, "enrolled");
        Ok(())
    }

    /// Every enrolled record in storage order; empty if nothing was ever
    /// persisted.
    pub async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        self.load().await
    }

    /// Remove the record enrolled under `username` and return it.
    pub async fn delete_by_username(&self, username: &str) -> Result<IdentityRecord, StoreError> {
        let (removed, count) = self
            .mutate(|records| {
                let Some(idx) = records.iter().position(|r| r.username == username) else {
                    tracing::info!(username, "delete rejected: not enrolled");
                    return Err(StoreError::NotFound(username.to_string()));
                };
                let removed = records.remove(idx);
                Ok((removed, records.len()))
            })
            .await?;
        tracing::info!(username, records = count, "deleted");
        Ok(removed)
    }

    /// Drop the backend's whole persistence location. Teardown only.
    pub async fn delete_container(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        bounded(
            "delete_container",
            self.options.io_timeout,
            self.backend.delete_container(),
        )
        .await?;
        tracing::warn!(backend = %self.backend.kind(), "persistence location deleted");
        Ok(())
    }

    /// Load, let `apply` change the snapshot, then write it back. Nothing is
    /// written when `apply` refuses.
    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<IdentityRecord>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let hold = self.hold().await?;
        let outcome = match self.load().await {
            Ok(mut records) => apply(&mut records).map(|value| (records, value)),
            Err(e) => Err(e),
        };
        match outcome {
            Ok((records, value)) => {
                self.persist(&records, hold).await?;
                Ok(value)
            }
            Err(e) => {
                hold.release().await;
                Err(e)
            }
        }
    }

    async fn hold(&self) -> Result<WriteHold, StoreError> {
        let local = Arc::clone(&self.write_lock).lock_owned().await;
        let key_lock = bounded(
            "lock",
            self.options.io_timeout,
            self.backend.lock(&self.options.key),
        )
        .await?;
        Ok(WriteHold {
            _local: local,
            key_lock,
        })
    }

    /// One backend read. Absent decodes to an empty collection.
    async fn load(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let payload = bounded(
            "get",
            self.options.io_timeout,
            self.backend.get(&self.options.key),
        )
        .await?;

        let Some(payload) = payload else {
            tracing::debug!(key = %self.options.key, "no collection persisted yet");
            return Ok(Vec::new());
        };

        let records: Vec<IdentityRecord> = serde_json::from_slice(&payload).map_err(|e| {
            tracing::warn!(key = %self.options.key, error = %e, "stored collection does not decode");
            StoreError::Corrupt(e.to_string())
        })?;
        for record in &records {
            record
                .validate()
                .map_err(|e| StoreError::Corrupt(format!("record {:?}: {e}", record.username)))?;
        }
        Ok(records)
    }

    /// One backend write of the full collection, then give up `hold`.
    ///
    /// The write runs as its own task. If it misses the deadline the caller
    /// gets [`StoreError::Indeterminate`] at once while the task keeps `hold`
    /// until the write finishes either way.
    async fn persist(&self, records: &[IdentityRecord], hold: WriteHold) -> Result<(), StoreError> {
        let payload = match serde_json::to_vec(records) {
            Ok(payload) => payload,
            Err(e) => {
                hold.release().await;
                return Err(StoreError::Indeterminate(StorageError::MalformedPayload(
                    e.to_string(),
                )));
            }
        };

        let backend = Arc::clone(&self.backend);
        let key = self.options.key.clone();
        let timeout = self.options.io_timeout;
        let mut write = tokio::spawn(async move { backend.put(&key, payload).await });

        let result = match tokio::time::timeout(timeout, &mut write).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StorageError::from(join)),
            Err(_) => {
                tracing::warn!(
                    key = %self.options.key,
                    ?timeout,
                    "collection write timed out; keeping the lock until it settles"
                );
                let key = self.options.key.clone();
                tokio::spawn(async move {
                    let settled = write.await;
                    tracing::debug!(key = %key, written = matches!(settled, Ok(Ok(()))), "late write settled");
                    hold.release().await;
                });
                return Err(self.indeterminate(StorageError::Timeout { op: "put", timeout }));
            }
        };
        hold.release().await;
        result.map_err(|e| self.indeterminate(e))
    }

    fn indeterminate(&self, e: StorageError) -> StoreError {
        tracing::warn!(
            key = %self.options.key,
            error = %e,
            retryable = e.is_retryable(),
            "collection write failed; persisted state unknown"
        );
        StoreError::Indeterminate(e)
    }
}
