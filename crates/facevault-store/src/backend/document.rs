//! Payloads as one document per record in a SQLite document table.
//!
//! A payload handed to `put` must be a JSON array of objects. Each object
//! becomes a document keyed by its id field (default `username`) inside the
//! collection named by the key. `get` streams the collection's documents
//! back as one JSON array, so callers see the same shape as a blob.

use super::flock::lock_file;
use super::{validate_key, BackendKind, KeyLock, PersistenceBackend, ProcessLocal};
use crate::error::StorageError;
use async_trait::async_trait;
use rusqlite::params;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;

const DEFAULT_ID_FIELD: &str = "username";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        doc_id     TEXT NOT NULL,
        body       TEXT NOT NULL,
        PRIMARY KEY (collection, doc_id)
    );
";

pub struct DocumentStoreBackend {
    conn: Connection,
    id_field: String,
    /// Database file, `None` when in memory.
    path: Option<PathBuf>,
}

impl DocumentStoreBackend {
    /// Open (or create) the database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn, Some(path.to_path_buf())).await
    }

    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, None).await
    }

    async fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StorageError> {
        conn.call(|conn| {
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self {
            conn,
            id_field: DEFAULT_ID_FIELD.to_string(),
            path,
        })
    }

    /// Key documents by a field other than `username`.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Split a JSON array payload into `(doc_id, body)` pairs.
    fn split_documents(&self, payload: &[u8]) -> Result<Vec<(String, String)>, StorageError> {
        let values: Vec<serde_json::Value> = serde_json::from_slice(payload)
            .map_err(|e| StorageError::MalformedPayload(format!("expected a JSON array: {e}")))?;

        let mut seen = HashSet::new();
        let mut docs = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            let id = value
                .get(&self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    StorageError::MalformedPayload(format!(
                        "element {idx} has no string field {:?}",
                        self.id_field
                    ))
                })?
                .to_string();
            if !seen.insert(id.clone()) {
                return Err(StorageError::MalformedPayload(format!(
                    "duplicate document id {id:?}"
                )));
            }
            docs.push((id, value.to_string()));
        }
        Ok(docs)
    }
}

#[async_trait]
impl PersistenceBackend for DocumentStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DocumentStore
    }

    /// `flock` on `<db>.<key>.lock` next to the database file. An in-memory
    /// database is private to this connection.
    async fn lock(&self, key: &str) -> Result<Box<dyn KeyLock>, StorageError> {
        validate_key(key)?;
        let Some(path) = &self.path else {
            return Ok(Box::new(ProcessLocal));
        };
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{key}.lock"));
        let lock = lock_file(path.with_file_name(name)).await?;
        Ok(Box::new(lock))
    }

    /// Replace every document of the collection in one transaction.
    async fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let docs = self.split_documents(&payload)?;
        let count = docs.len();
        let collection = key.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM documents WHERE collection = ?1", [&collection])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
                    )?;
                    for (id, body) in &docs {
                        stmt.execute(params![collection, id, body])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!(collection = key, documents = count, "replaced collection");
        Ok(())
    }

    /// All documents of the collection, or `None` when it has none.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let collection = key.to_string();

        let bodies = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM documents WHERE collection = ?1 ORDER BY doc_id",
                )?;
                let rows = stmt.query_map([&collection], |row| row.get::<_, String>(0))?;
                let bodies = rows.collect::<Result<Vec<String>, _>>()?;
                Ok(bodies)
            })
            .await?;

        tracing::debug!(collection = key, documents = bodies.len(), "streamed collection");
        if bodies.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("[{}]", bodies.join(",")).into_bytes()))
    }

    async fn delete_container(&self) -> Result<(), StorageError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM documents", [])?;
                Ok(())
            })
            .await?;
        tracing::info!("deleted all document collections");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn payload(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn decode(data: Vec<u8>) -> Vec<Value> {
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn test_empty_collection_is_absent() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        assert!(backend.get("representations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_all_documents() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        let docs = json!([
            {"username": "bob", "info": "sales", "embedding": [0.0, 1.0]},
            {"username": "alice", "info": "eng", "embedding": [1.0, 0.0]},
        ]);
        backend.put("representations", payload(docs)).await.unwrap();

        let got = decode(backend.get("representations").await.unwrap().unwrap());
        assert_eq!(got.len(), 2);
        let names: HashSet<&str> = got.iter().map(|d| d["username"].as_str().unwrap()).collect();
        assert_eq!(names, HashSet::from(["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_put_replaces_removed_documents() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        backend
            .put("representations", payload(json!([{"username": "a"}, {"username": "b"}])))
            .await
            .unwrap();
        backend
            .put("representations", payload(json!([{"username": "b"}])))
            .await
            .unwrap();

        let got = decode(backend.get("representations").await.unwrap().unwrap());
        assert_eq!(got, vec![json!({"username": "b"})]);

        backend.put("representations", payload(json!([]))).await.unwrap();
        assert!(backend.get("representations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        backend.put("one", payload(json!([{"username": "a"}]))).await.unwrap();
        backend.put("two", payload(json!([{"username": "b"}]))).await.unwrap();

        let one = decode(backend.get("one").await.unwrap().unwrap());
        assert_eq!(one, vec![json!({"username": "a"})]);

        backend.delete_container().await.unwrap();
        assert!(backend.get("one").await.unwrap().is_none());
        assert!(backend.get("two").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_array_payload() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        let err = backend
            .put("representations", b"{\"username\": \"a\"}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_duplicate_ids() {
        let backend = DocumentStoreBackend::open_in_memory().await.unwrap();
        let err = backend
            .put("representations", payload(json!([{"info": "no id"}])))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedPayload(_)));

        let err = backend
            .put("representations", payload(json!([{"username": "a"}, {"username": "a"}])))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedPayload(_)));
        assert!(backend.get("representations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_id_field() {
        let backend = DocumentStoreBackend::open_in_memory()
            .await
            .unwrap()
            .with_id_field("id");
        backend
            .put("things", payload(json!([{"id": "x", "v": 1}])))
            .await
            .unwrap();
        let got = decode(backend.get("things").await.unwrap().unwrap());
        assert_eq!(got[0]["v"], 1);
    }

    #[tokio::test]
    async fn test_lock_sits_next_to_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("documents.db");
        let a = DocumentStoreBackend::open(&path).await.unwrap();
        let b = DocumentStoreBackend::open(&path).await.unwrap();

        let held = a.lock("representations").await.unwrap();
        assert!(tmp.path().join("documents.db.representations.lock").exists());
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            b.lock("representations"),
        )
        .await;
        assert!(waiting.is_err());

        held.release().await.unwrap();
        b.lock("representations").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("documents.db");
        {
            let backend = DocumentStoreBackend::open(&path).await.unwrap();
            backend
                .put("representations", payload(json!([{"username": "a"}])))
                .await
                .unwrap();
        }
        let backend = DocumentStoreBackend::open(&path).await.unwrap();
        assert!(backend.get("representations").await.unwrap().is_some());
    }
}
