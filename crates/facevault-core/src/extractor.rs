//! Embedding extraction boundary.
//!
//! Detection and embedding inference run outside this workspace. The rest
//! of the system only sees an [`EmbeddingExtractor`] that turns an image
//! path into zero or more detected faces.

use crate::types::DetectedFace;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face summary {path} is invalid: {message}")]
    InvalidSummary { path: PathBuf, message: String },
}

/// Turns an image into one embedding and bounding box per detected face.
///
/// Implementations may block (model inference); async callers should run
/// them on a blocking thread.
pub trait EmbeddingExtractor: Send + Sync {
    /// Fails with [`ExtractError::NoFaceDetected`] when the image holds no face.
    fn extract(&self, image: &Path) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// On-disk output of an offline detection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceSummary {
    pub faces: Vec<DetectedFace>,
}

/// Extractor backed by precomputed face summaries.
///
/// The "image" handed to [`extract`](EmbeddingExtractor::extract) is the
/// JSON summary written by the detection pipeline for that image.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryFileExtractor;

impl SummaryFileExtractor {
    pub fn load(path: &Path) -> Result<FaceSummary, ExtractError> {
        let file = File::open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ExtractError::InputNotFound(path.to_path_buf())
            } else {
                ExtractError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| ExtractError::InvalidSummary {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl EmbeddingExtractor for SummaryFileExtractor {
    fn extract(&self, image: &Path) -> Result<Vec<DetectedFace>, ExtractError> {
        let summary = Self::load(image)?;
        if summary.faces.is_empty() {
            return Err(ExtractError::NoFaceDetected);
        }

        let invalid = |message: String| ExtractError::InvalidSummary {
            path: image.to_path_buf(),
            message,
        };
        for (idx, face) in summary.faces.iter().enumerate() {
            face.embedding
                .validate()
                .map_err(|e| invalid(format!("face {idx}: {e}")))?;
            face.bounding_box
                .validate()
                .map_err(|e| invalid(format!("face {idx}: {e}")))?;
        }

        tracing::debug!(path = %image.display(), faces = summary.faces.len(), "loaded face summary");
        Ok(summary.faces)
    }
}
