//! In-process fake of the blob REST API.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Containers = HashMap<String, HashMap<String, Vec<u8>>>;

#[derive(Clone, Default)]
pub struct FakeBlobService {
    containers: Arc<Mutex<Containers>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    /// Container name to the id of the lease currently held on it.
    leases: Arc<Mutex<HashMap<String, String>>>,
    next_lease: Arc<AtomicU64>,
    /// Answer every request with 503.
    pub unavailable: Arc<AtomicBool>,
    /// Hold every request for a few seconds before answering.
    pub stalled: Arc<AtomicBool>,
}

impl FakeBlobService {
    /// Serve on an ephemeral local port and return the account URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/:container", put(create_container).delete(delete_container))
            .route("/:container/:blob", put(put_blob).get(get_blob))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn blob(&self, container: &str, blob: &str) -> Option<Vec<u8>> {
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .and_then(|c| c.get(blob).cloned())
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.containers.lock().unwrap().contains_key(container)
    }

    pub fn is_leased(&self, container: &str) -> bool {
        self.leases.lock().unwrap().contains_key(container)
    }

    pub fn seen_queries(&self) -> Vec<HashMap<String, String>> {
        self.queries.lock().unwrap().clone()
    }

    async fn gate(&self, query: HashMap<String, String>) -> Option<StatusCode> {
        self.queries.lock().unwrap().push(query);
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Some(StatusCode::SERVICE_UNAVAILABLE);
        }
        None
    }
}

async fn create_container(
    State(svc): State<FakeBlobService>,
    Path(container): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let is_container_op = query.get("restype").map(String::as_str) == Some("container");
    let is_lease = query.get("comp").map(String::as_str) == Some("lease");
    if let Some(status) = svc.gate(query).await {
        return status.into_response();
    }
    if !is_container_op {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if is_lease {
        return lease_container(&svc, container, &headers);
    }
    let mut containers = svc.containers.lock().unwrap();
    if containers.contains_key(&container) {
        return StatusCode::CONFLICT.into_response();
    }
    containers.insert(container, HashMap::new());
    StatusCode::CREATED.into_response()
}

fn lease_container(svc: &FakeBlobService, container: String, headers: &HeaderMap) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if !svc.has_container(&container) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let mut leases = svc.leases.lock().unwrap();
    match header("x-ms-lease-action") {
        Some("acquire") => {
            if leases.contains_key(&container) {
                return StatusCode::CONFLICT.into_response();
            }
            let id = format!("lease-{}", svc.next_lease.fetch_add(1, Ordering::SeqCst));
            leases.insert(container, id.clone());
            (StatusCode::CREATED, [("x-ms-lease-id", id)]).into_response()
        }
        Some("release") => {
            let held = leases.get(&container).map(String::as_str);
            if held.is_none() || held != header("x-ms-lease-id") {
                return StatusCode::CONFLICT.into_response();
            }
            leases.remove(&container);
            StatusCode::OK.into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn delete_container(
    State(svc): State<FakeBlobService>,
    Path(container): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    if let Some(status) = svc.gate(query).await {
        return status;
    }
    if svc.is_leased(&container) {
        return StatusCode::PRECONDITION_FAILED;
    }
    match svc.containers.lock().unwrap().remove(&container) {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::NOT_FOUND,
    }
}

async fn put_blob(
    State(svc): State<FakeBlobService>,
    Path((container, blob)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(status) = svc.gate(query).await {
        return status;
    }
    let block_blob = headers
        .get("x-ms-blob-type")
        .and_then(|v| v.to_str().ok())
        == Some("BlockBlob");
    if !block_blob {
        return StatusCode::BAD_REQUEST;
    }
    let mut containers = svc.containers.lock().unwrap();
    match containers.get_mut(&container) {
        Some(blobs) => {
            blobs.insert(blob, body.to_vec());
            StatusCode::CREATED
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn get_blob(
    State(svc): State<FakeBlobService>,
    Path((container, blob)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Vec<u8>, StatusCode> {
    if let Some(status) = svc.gate(query).await {
        return Err(status);
    }
    svc.containers
        .lock()
        .unwrap()
        .get(&container)
        .and_then(|c| c.get(&blob).cloned())
        .ok_or(StatusCode::NOT_FOUND)
}
