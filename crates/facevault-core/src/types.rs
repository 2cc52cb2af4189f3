use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required field was missing or malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("embedding must contain at least one value")]
    EmptyEmbedding,
    #[error("embedding value {index} is not a finite number")]
    NonFiniteEmbedding { index: usize },
    #[error("bounding box has negative extent: ({x1}, {y1}) -> ({x2}, {y2})")]
    InvertedBox { x1: i32, y1: i32, x2: i32, y2: i32 },
}

/// Face embedding vector (512-dimensional for Facenet512 and ArcFace).
///
/// Serialized as a bare list of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Non-empty and every value finite. JSON has no encoding for NaN or
    /// infinity, so anything else cannot be persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.values.is_empty() {
            return Err(ValidationError::EmptyEmbedding);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(ValidationError::NonFiniteEmbedding { index }),
            None => Ok(()),
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero-norm operand yields 0.0. Operands are zipped, so callers must
    /// check lengths first.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// L2 norm of the element-wise difference.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Face rectangle in image pixels, stored as corner points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Build from the detector's origin + extent form.
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + width,
            y2: y + height,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.x2 < self.x1 || self.y2 < self.y1 {
            return Err(ValidationError::InvertedBox {
                x1: self.x1,
                y1: self.y1,
                x2: self.x2,
                y2: self.y2,
            });
        }
        Ok(())
    }
}

/// One face found by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub bounding_box: BoundingBox,
}

/// An enrolled identity. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub username: String,
    pub info: String,
    pub embedding: Embedding,
}

impl IdentityRecord {
    /// Build a record, rejecting an empty username or embedding.
    pub fn new(
        username: impl Into<String>,
        info: impl Into<String>,
        embedding: impl Into<Embedding>,
    ) -> Result<Self, ValidationError> {
        let record = Self {
            username: username.into(),
            info: info.into(),
            embedding: embedding.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Records decoded from storage bypass `new`, so the store re-checks them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        self.embedding.validate()
    }

    pub fn label(&self) -> String {
        identity_label(&self.username, &self.info)
    }
}

/// Label reported by identification: `"username - info"`.
pub(crate) fn identity_label(username: &str, info: &str) -> String {
    format!("{username} - {info}")
}
