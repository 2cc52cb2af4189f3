//! Advisory `flock(2)` locks on a sidecar file.

use super::KeyLock;
use crate::error::StorageError;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Held until released or dropped; the kernel drops it if the process dies.
pub(crate) struct FileLock {
    _flock: Flock<File>,
    path: PathBuf,
}

#[async_trait]
impl KeyLock for FileLock {
    async fn release(self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!(path = %self.path.display(), "released file lock");
        Ok(())
    }
}

/// Poll a non-blocking exclusive lock on `path`, creating the file and its
/// directory if needed.
pub(crate) async fn lock_file(path: PathBuf) -> Result<FileLock, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(&path, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| io_error(&path, e))?;

    let mut waited = false;
    loop {
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                tracing::debug!(path = %path.display(), waited, "acquired file lock");
                return Ok(FileLock {
                    _flock: flock,
                    path,
                });
            }
            Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                file = returned;
                waited = true;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err((_, errno)) => return Err(io_error(&path, io::Error::from(errno))),
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}
