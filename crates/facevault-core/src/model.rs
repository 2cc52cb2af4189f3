//! Recognition models and their verification thresholds.
//!
//! Each model produces embeddings of a fixed dimension and was calibrated
//! with its own distance cut-off per metric. The values match the ones
//! published alongside the reference implementations of each model.

use crate::matcher::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Face recognition model that produced the stored embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecognitionModel {
    #[serde(rename = "VGG-Face")]
    VggFace,
    Facenet,
    Facenet512,
    OpenFace,
    DeepFace,
    DeepID,
    ArcFace,
    Dlib,
    SFace,
}

impl RecognitionModel {
    pub const ALL: [RecognitionModel; 9] = [
        RecognitionModel::VggFace,
        RecognitionModel::Facenet,
        RecognitionModel::Facenet512,
        RecognitionModel::OpenFace,
        RecognitionModel::DeepFace,
        RecognitionModel::DeepID,
        RecognitionModel::ArcFace,
        RecognitionModel::Dlib,
        RecognitionModel::SFace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RecognitionModel::VggFace => "VGG-Face",
            RecognitionModel::Facenet => "Facenet",
            RecognitionModel::Facenet512 => "Facenet512",
            RecognitionModel::OpenFace => "OpenFace",
            RecognitionModel::DeepFace => "DeepFace",
            RecognitionModel::DeepID => "DeepID",
            RecognitionModel::ArcFace => "ArcFace",
            RecognitionModel::Dlib => "Dlib",
            RecognitionModel::SFace => "SFace",
        }
    }

    /// Length of every embedding this model emits.
    pub fn dimension(self) -> usize {
        match self {
            RecognitionModel::VggFace => 4096,
            RecognitionModel::Facenet => 128,
            RecognitionModel::Facenet512 => 512,
            RecognitionModel::OpenFace => 128,
            RecognitionModel::DeepFace => 4096,
            RecognitionModel::DeepID => 160,
            RecognitionModel::ArcFace => 512,
            RecognitionModel::Dlib => 128,
            RecognitionModel::SFace => 128,
        }
    }

    /// Maximum distance at which two embeddings are the same identity.
    pub fn threshold(self, metric: Metric) -> f32 {
        let (cosine, euclidean) = match self {
            RecognitionModel::VggFace => (0.68, 1.17),
            RecognitionModel::Facenet => (0.40, 10.0),
            RecognitionModel::Facenet512 => (0.30, 23.56),
            RecognitionModel::OpenFace => (0.10, 0.55),
            RecognitionModel::DeepFace => (0.23, 64.0),
            RecognitionModel::DeepID => (0.015, 45.0),
            RecognitionModel::ArcFace => (0.68, 4.15),
            RecognitionModel::Dlib => (0.07, 0.6),
            RecognitionModel::SFace => (0.593, 10.734),
        };
        match metric {
            Metric::Cosine => cosine,
            Metric::Euclidean => euclidean,
        }
    }
}

impl fmt::Display for RecognitionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecognitionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecognitionModel::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown recognition model: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("facenet512".parse::<RecognitionModel>().unwrap(), RecognitionModel::Facenet512);
        assert_eq!("VGG-Face".parse::<RecognitionModel>().unwrap(), RecognitionModel::VggFace);
        assert_eq!(" ArcFace ".parse::<RecognitionModel>().unwrap(), RecognitionModel::ArcFace);
        assert!("resnet".parse::<RecognitionModel>().is_err());
    }

    #[test]
    fn test_name_roundtrip() {
        for model in RecognitionModel::ALL {
            assert_eq!(model.name().parse::<RecognitionModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_facenet512_thresholds() {
        let m = RecognitionModel::Facenet512;
        assert!((m.threshold(Metric::Euclidean) - 23.56).abs() < 1e-6);
        assert!((m.threshold(Metric::Cosine) - 0.30).abs() < 1e-6);
        assert_eq!(m.dimension(), 512);
    }

    #[test]
    fn test_thresholds_positive() {
        for model in RecognitionModel::ALL {
            assert!(model.threshold(Metric::Cosine) > 0.0, "{model}");
            assert!(model.threshold(Metric::Euclidean) > 0.0, "{model}");
        }
    }
}
