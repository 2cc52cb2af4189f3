//! facevault-core — Identity records and similarity matching.
//!
//! Holds the data model shared by the store and the front end, the
//! per-model threshold table, and the match engine that turns query
//! embeddings into identities.

pub mod extractor;
pub mod matcher;
pub mod model;
pub mod types;

pub use extractor::{EmbeddingExtractor, ExtractError, FaceSummary, SummaryFileExtractor};
pub use matcher::{IdentityMatch, MatchEngine, MatchError, Metric};
pub use model::RecognitionModel;
pub use types::{BoundingBox, DetectedFace, Embedding, IdentityRecord, ValidationError};
