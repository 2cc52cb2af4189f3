//! facevault-store — Enrolled identity collection and its persistence.
//!
//! The whole collection lives under one well-known key and is rewritten on
//! every mutation. Three interchangeable backends (local files, a blob REST
//! service, a SQLite document table) sit behind [`PersistenceBackend`].

pub mod backend;
pub mod error;
pub mod store;

pub use backend::{
    open_backend, BackendConfig, BackendKind, CloudBlobBackend, CloudBlobConfig,
    DocumentStoreBackend, KeyLock, LocalFileBackend, PersistenceBackend,
};
pub use error::{StorageError, StoreError};
pub use store::{RepresentationStore, StoreOptions, DEFAULT_COLLECTION_KEY, DEFAULT_IO_TIMEOUT};
