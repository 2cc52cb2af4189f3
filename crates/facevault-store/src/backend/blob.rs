//! Payloads as block blobs in a cloud storage container.
//!
//! Speaks the Azure Blob REST dialect:
//!
//! - `PUT  {account}/{container}?restype=container` creates the container
//! - `PUT  {account}/{container}/{key}` with `x-ms-blob-type: BlockBlob`
//! - `GET  {account}/{container}/{key}`, where 404 means absent
//! - `DELETE {account}/{container}?restype=container`
//! - `PUT  {account}/{container}?comp=lease&restype=container` to take and
//!   give back the container lease that serializes writers
//!
//! Authorization uses a shared-access signature appended to the query
//! string. The signature never appears in errors or logs.

use super::{validate_key, BackendKind, KeyLock, PersistenceBackend};
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;

const API_VERSION: &str = "2021-08-06";

const CONTAINER: &[&str] = &["restype=container"];
const CONTAINER_LEASE: &[&str] = &["comp=lease", "restype=container"];

/// Longest finite lease. A holder that dies frees the container after this.
const LEASE_SECONDS: &str = "60";
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CloudBlobConfig {
    /// Account endpoint, e.g. `https://<account>.blob.core.windows.net`.
    pub account_url: String,
    pub container: String,
    /// Shared-access signature query string, with or without leading `?`.
    pub sas_token: Option<String>,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
}

impl CloudBlobConfig {
    pub fn new(account_url: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            account_url: account_url.into(),
            container: container.into(),
            sas_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CloudBlobBackend {
    client: reqwest::Client,
    container_url: String,
    sas_token: Option<String>,
}

impl CloudBlobBackend {
    /// Build the HTTP client and make sure the container exists.
    pub async fn connect(config: CloudBlobConfig) -> Result<Self, StorageError> {
        validate_key(&config.container)?;
        let container_url = format!(
            "{}/{}",
            config.account_url.trim_end_matches('/'),
            config.container
        );

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| StorageError::Http {
                url: container_url.clone(),
                source,
            })?;

        let sas_token = config
            .sas_token
            .map(|t| t.trim_start_matches('?').to_string())
            .filter(|t| !t.is_empty());

        let backend = Self {
            client,
            container_url,
            sas_token,
        };
        backend.ensure_container().await?;
        Ok(backend)
    }

    pub fn container_url(&self) -> &str {
        &self.container_url
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/{}", self.container_url, key)
    }

    /// Attach query parameters and the signature.
    fn signed(&self, url: &str, query: &[&str]) -> String {
        let mut query = query.to_vec();
        if let Some(sas) = &self.sas_token {
            query.push(sas.as_str());
        }
        if query.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", query.join("&"))
        }
    }

    fn request(&self, method: Method, url: &str, query: &[&str]) -> RequestBuilder {
        self.client
            .request(method, self.signed(url, query))
            .header("x-ms-version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, StorageError> {
        request.send().await.map_err(|source| StorageError::Http {
            url: url.to_string(),
            source: source.without_url(),
        })
    }

    async fn ensure_container(&self) -> Result<(), StorageError> {
        let url = self.container_url.clone();
        let response = self
            .send(self.request(Method::PUT, &url, CONTAINER), &url)
            .await?;
        match response.status() {
            s if s.is_success() => {
                tracing::info!(container = %url, "created blob container");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            s => Err(StorageError::Status {
                method: "PUT",
                url,
                status: s.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl PersistenceBackend for CloudBlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudBlob
    }

    /// Acquire the container lease, retrying while another writer holds it.
    /// One lease covers every key in the container.
    async fn lock(&self, _key: &str) -> Result<Box<dyn KeyLock>, StorageError> {
        let url = self.container_url.clone();
        loop {
            let request = self
                .request(Method::PUT, &url, CONTAINER_LEASE)
                .header("x-ms-lease-action", "acquire")
                .header("x-ms-lease-duration", LEASE_SECONDS);
            let response = self.send(request, &url).await?;
            match response.status() {
                s if s.is_success() => {
                    let lease_id = response
                        .headers()
                        .get("x-ms-lease-id")
                        .and_then(|v| v.to_str().ok())
                        .ok_or_else(|| {
                            StorageError::MalformedPayload(
                                "lease granted without x-ms-lease-id".to_string(),
                            )
                        })?
                        .to_string();
                    tracing::debug!(container = %url, "acquired container lease");
                    return Ok(Box::new(ContainerLease {
                        client: self.client.clone(),
                        signed_url: self.signed(&url, CONTAINER_LEASE),
                        container_url: url,
                        lease_id,
                    }));
                }
                StatusCode::CONFLICT => tokio::time::sleep(LEASE_POLL_INTERVAL).await,
                s => {
                    return Err(StorageError::Status {
                        method: "PUT",
                        url,
                        status: s.as_u16(),
                    })
                }
            }
        }
    }

    async fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let url = self.blob_url(key);
        let bytes = payload.len();
        let request = self
            .request(Method::PUT, &url, &[])
            .header("x-ms-blob-type", "BlockBlob")
            .body(payload);
        let response = self.send(request, &url).await?;
        if !response.status().is_success() {
            return Err(StorageError::Status {
                method: "PUT",
                url,
                status: response.status().as_u16(),
            });
        }
        tracing::debug!(blob = %url, bytes, "uploaded blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let url = self.blob_url(key);
        let response = self.send(self.request(Method::GET, &url, &[]), &url).await?;
        match response.status() {
            // Missing blob and missing container both mean nothing stored.
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let data = response.bytes().await.map_err(|source| StorageError::Http {
                    url: url.clone(),
                    source: source.without_url(),
                })?;
                tracing::debug!(blob = %url, bytes = data.len(), "downloaded blob");
                Ok(Some(data.to_vec()))
            }
            s => Err(StorageError::Status {
                method: "GET",
                url,
                status: s.as_u16(),
            }),
        }
    }

    async fn delete_container(&self) -> Result<(), StorageError> {
        let url = self.container_url.clone();
        let response = self
            .send(self.request(Method::DELETE, &url, CONTAINER), &url)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => {
                tracing::info!(container = %url, "deleted blob container");
                Ok(())
            }
            s => Err(StorageError::Status {
                method: "DELETE",
                url,
                status: s.as_u16(),
            }),
        }
    }
}

/// Held container lease. Lapses on its own if never released.
struct ContainerLease {
    client: reqwest::Client,
    /// Lease URL including the signature; never logged.
    signed_url: String,
    container_url: String,
    lease_id: String,
}

#[async_trait]
impl KeyLock for ContainerLease {
    async fn release(self: Box<Self>) -> Result<(), StorageError> {
        let response = self
            .client
            .put(&self.signed_url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-lease-action", "release")
            .header("x-ms-lease-id", &self.lease_id)
            .send()
            .await
            .map_err(|source| StorageError::Http {
                url: self.container_url.clone(),
                source: source.without_url(),
            })?;
        if !response.status().is_success() {
            return Err(StorageError::Status {
                method: "PUT",
                url: self.container_url.clone(),
                status: response.status().as_u16(),
            });
        }
        tracing::debug!(container = %self.container_url, "released container lease");
        Ok(())
    }
}
