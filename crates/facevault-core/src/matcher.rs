//! Nearest-identity search over an enrolled collection.
//!
//! The engine is pure: it works on a snapshot of the collection taken by the
//! caller and holds no state beyond its metric and threshold.

use crate::model::RecognitionModel;
use crate::types::{identity_label, Embedding, IdentityRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding length mismatch: expected {expected} values, got {actual}")]
    InvalidArgument { expected: usize, actual: usize },
    #[error("identity not enrolled: {0}")]
    IdentityNotFound(String),
}

/// Distance function between two embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    /// Distance between `a` and `b`; lower = more alike.
    ///
    /// Cosine distance is `1 - similarity`, so a zero-norm operand gives 1.0.
    pub fn distance(self, a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
        if a.len() != b.len() {
            return Err(MatchError::InvalidArgument {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(match self {
            Metric::Euclidean => a.euclidean_distance(b),
            Metric::Cosine => 1.0 - a.similarity(b),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// A query embedding resolved to an enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMatch {
    /// Position of the query embedding in the input.
    pub query_index: usize,
    /// Position of the matched record in storage order.
    pub record_index: usize,
    pub username: String,
    pub info: String,
    pub distance: f32,
}

impl IdentityMatch {
    pub fn label(&self) -> String {
        identity_label(&self.username, &self.info)
    }
}

/// Applies a metric and a distance threshold to decide identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchEngine {
    metric: Metric,
    threshold: f32,
}

impl MatchEngine {
    /// Engine using the calibrated threshold for `(model, metric)`.
    pub fn new(model: RecognitionModel, metric: Metric) -> Self {
        Self {
            metric,
            threshold: model.threshold(metric),
        }
    }

    /// Engine with an explicit threshold.
    pub fn with_threshold(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Index and distance of the record nearest to `query`.
    ///
    /// Scans every record. Ties keep the earliest record; NaN distances
    /// never win. Returns `None` for an empty collection.
    pub fn closest(
        &self,
        query: &Embedding,
        known: &[IdentityRecord],
    ) -> Result<Option<(usize, f32)>, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in known.iter().enumerate() {
            let distance = self.metric.distance(query, &record.embedding)?;
            if distance.is_nan() {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        Ok(best)
    }

    /// Resolve each query to at most one identity, in input order.
    ///
    /// Queries whose nearest record lies beyond the threshold produce
    /// nothing, so the output may be shorter than the input.
    pub fn identify_detailed(
        &self,
        queries: &[Embedding],
        known: &[IdentityRecord],
    ) -> Result<Vec<IdentityMatch>, MatchError> {
        let mut found = Vec::new();

        for (query_index, query) in queries.iter().enumerate() {
            let Some((record_index, distance)) = self.closest(query, known)? else {
                continue;
            };
            let record = &known[record_index];
            tracing::debug!(
                query = query_index,
                username = %record.username,
                distance,
                threshold = self.threshold,
                "nearest record"
            );
            if distance <= self.threshold {
                found.push(IdentityMatch {
                    query_index,
                    record_index,
                    username: record.username.clone(),
                    info: record.info.clone(),
                    distance,
                });
            }
        }

        Ok(found)
    }

    /// Labels (`"username - info"`) of the identities found in `queries`.
    pub fn identify(
        &self,
        queries: &[Embedding],
        known: &[IdentityRecord],
    ) -> Result<Vec<String>, MatchError> {
        Ok(self
            .identify_detailed(queries, known)?
            .iter()
            .map(IdentityMatch::label)
            .collect())
    }

    /// True iff any query lies within the threshold of the claimed identity.
    pub fn verify(
        &self,
        queries: &[Embedding],
        claimed_username: &str,
        known: &[IdentityRecord],
    ) -> Result<bool, MatchError> {
        let target = known
            .iter()
            .find(|r| r.username == claimed_username)
            .ok_or_else(|| MatchError::IdentityNotFound(claimed_username.to_string()))?;

        let mut min_distance: Option<f32> = None;
        for query in queries {
            let distance = self.metric.distance(query, &target.embedding)?;
            if distance.is_nan() {
                continue;
            }
            min_distance = Some(match min_distance {
                Some(d) if d <= distance => d,
                _ => distance,
            });
        }

        let verified = matches!(min_distance, Some(d) if d <= self.threshold);
        tracing::debug!(
            username = claimed_username,
            distance = ?min_distance,
            threshold = self.threshold,
            verified,
            "verify"
        );
        Ok(verified)
    }
}
