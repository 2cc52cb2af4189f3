//! Payloads as files under one directory.

use super::flock::lock_file;
use super::{validate_key, BackendKind, KeyLock, PersistenceBackend};
use crate::error::StorageError;
use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Stores each key as `<dir>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
    dir: PathBuf,
}

impl LocalFileBackend {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl PersistenceBackend for LocalFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalFile
    }

    /// `flock` on `<dir>/<key>.lock`, shared by every process using the
    /// directory.
    async fn lock(&self, key: &str) -> Result<Box<dyn KeyLock>, StorageError> {
        validate_key(key)?;
        let lock = lock_file(self.dir.join(format!("{key}.lock"))).await?;
        Ok(Box::new(lock))
    }

    async fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &payload))
            .await
            .map_err(|e| StorageError::Io {
                path,
                source: io::Error::other(e),
            })?
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(path = %path.display(), bytes = data.len(), "read payload");
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    async fn delete_container(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}

/// Write through a temp file in the same directory and rename over the
/// target, so readers see either the old or the new payload.
fn write_atomic(dir: &Path, path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    let io_err = |source: io::Error| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(payload).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    let file = tmp.persist(path).map_err(|e| io_err(e.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(io_err)?;
    }
    #[cfg(not(unix))]
    drop(file);

    tracing::debug!(path = %path.display(), bytes = payload.len(), "wrote payload");
    Ok(())
}
