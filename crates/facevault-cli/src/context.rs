//! Application context shared by every command.
//!
//! Owns the store, the match engine and the extractor for the life of the
//! process. Each operation takes one snapshot of the collection and works on
//! it; the store serializes mutations.

use crate::config::{Config, ConfigError};
use facevault_core::{
    BoundingBox, DetectedFace, EmbeddingExtractor, ExtractError, IdentityRecord, MatchEngine,
    MatchError, ValidationError,
};
use facevault_store::{open_backend, RepresentationStore, StorageError, StoreError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("{0} faces detected, expected exactly one")]
    MultipleFacesDetected(usize),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("backend unavailable: {0}")]
    Backend(#[from] StorageError),
    #[error("extractor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ServiceError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Store(e) => e.is_retryable(),
            ServiceError::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub struct AppContext {
    store: RepresentationStore,
    engine: MatchEngine,
    extractor: Arc<dyn EmbeddingExtractor>,
    /// Embedding length every enrolled record must have, if known.
    dimension: Option<usize>,
}

impl AppContext {
    pub fn new(
        store: RepresentationStore,
        engine: MatchEngine,
        extractor: Arc<dyn EmbeddingExtractor>,
        dimension: Option<usize>,
    ) -> Self {
        Self {
            store,
            engine,
            extractor,
            dimension,
        }
    }

    /// Open the configured backend and wire the context around it.
    pub async fn open(
        config: &Config,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Result<Self, ServiceError> {
        let backend = open_backend(&config.backend_config()?).await?;
        let store = RepresentationStore::new(backend, config.store_options());
        let engine = config.engine();
        tracing::info!(
            backend = %config.backend,
            model = %config.model,
            metric = %engine.metric(),
            threshold = engine.threshold(),
            "context ready"
        );
        Ok(Self::new(
            store,
            engine,
            extractor,
            Some(config.model.dimension()),
        ))
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Enroll the single face found in `image` under `username`.
    pub async fn enroll(
        &self,
        image: &Path,
        username: &str,
        info: &str,
    ) -> Result<IdentityRecord, ServiceError> {
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }

        let face = single_face(self.extract(image).await?)?;
        if let Some(expected) = self.dimension {
            if face.embedding.len() != expected {
                return Err(MatchError::InvalidArgument {
                    expected,
                    actual: face.embedding.len(),
                }
                .into());
            }
        }

        let record = IdentityRecord::new(username, info, face.embedding)?;
        self.store.enroll(record.clone()).await?;
        Ok(record)
    }

    /// Labels (`"username - info"`) of every enrolled identity seen in `image`.
    pub async fn identify(&self, image: &Path) -> Result<Vec<String>, ServiceError> {
        let faces = self.extract(image).await?;
        let queries: Vec<_> = faces.into_iter().map(|f| f.embedding).collect();
        let known = self.store.list().await?;
        let labels = self.engine.identify(&queries, &known)?;
        tracing::info!(faces = queries.len(), matches = labels.len(), "identified");
        Ok(labels)
    }

    /// Whether the single face in `image` belongs to `username`.
    pub async fn verify(&self, image: &Path, username: &str) -> Result<bool, ServiceError> {
        let face = single_face(self.extract(image).await?)?;
        let known = self.store.list().await?;
        let verified = self
            .engine
            .verify(std::slice::from_ref(&face.embedding), username, &known)?;
        tracing::info!(username, verified, "verified");
        Ok(verified)
    }

    pub async fn remove(&self, username: &str) -> Result<IdentityRecord, ServiceError> {
        Ok(self.store.delete_by_username(username).await?)
    }

    pub async fn list(&self) -> Result<Vec<IdentityRecord>, ServiceError> {
        Ok(self.store.list().await?)
    }

    /// Bounding boxes of every face detected in `image`.
    pub async fn face_areas(&self, image: &Path) -> Result<Vec<BoundingBox>, ServiceError> {
        let faces = self.extract(image).await?;
        Ok(faces.into_iter().map(|f| f.bounding_box).collect())
    }

    /// Drop the whole persistence location.
    pub async fn purge(&self) -> Result<(), ServiceError> {
        Ok(self.store.delete_container().await?)
    }

    /// Run the extractor off the async runtime.
    async fn extract(&self, image: &Path) -> Result<Vec<DetectedFace>, ServiceError> {
        let extractor = Arc::clone(&self.extractor);
        let image = image.to_path_buf();
        let faces = tokio::task::spawn_blocking(move || extractor.extract(&image)).await??;
        tracing::debug!(faces = faces.len(), "extracted");
        Ok(faces)
    }
}

fn single_face(mut faces: Vec<DetectedFace>) -> Result<DetectedFace, ServiceError> {
    match (faces.pop(), faces.len()) {
        (Some(face), 0) => Ok(face),
        (Some(_), rest) => Err(ServiceError::MultipleFacesDetected(rest + 1)),
        (None, _) => Err(ExtractError::NoFaceDetected.into()),
    }
}
