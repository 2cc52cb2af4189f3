use facevault_core::{MatchEngine, Metric, RecognitionModel};
use facevault_store::{
    BackendConfig, BackendKind, CloudBlobConfig, StoreOptions, DEFAULT_COLLECTION_KEY,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("the blob backend needs blob_url (FACEVAULT_BLOB_URL)")]
    MissingBlobUrl,
}

/// Front-end configuration.
///
/// Built from defaults, then the TOML file named by `FACEVAULT_CONFIG`,
/// then `FACEVAULT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Which persistence backend holds the collection.
    pub backend: BackendKind,
    /// Directory of the local-file backend.
    pub data_dir: PathBuf,
    /// Account endpoint of the blob backend.
    pub blob_url: Option<String>,
    pub blob_container: String,
    /// Shared-access signature for the blob backend.
    pub blob_sas: Option<String>,
    /// SQLite file of the document backend (default: `<data_dir>/documents.db`).
    pub document_db: Option<PathBuf>,
    /// Key under which the collection is persisted.
    pub collection: String,
    pub model: RecognitionModel,
    pub metric: Metric,
    /// Overrides the model's calibrated threshold.
    pub threshold: Option<f32>,
    /// Deadline for each backend call, in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::LocalFile,
            data_dir: default_data_dir(),
            blob_url: None,
            blob_container: "dfdb".to_string(),
            blob_sas: None,
            document_db: None,
            collection: DEFAULT_COLLECTION_KEY.to_string(),
            model: RecognitionModel::Facenet512,
            metric: Metric::Euclidean,
            threshold: None,
            io_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Load from `FACEVAULT_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("FACEVAULT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every comparison fail silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threshold) = self.threshold {
            check_threshold("threshold", threshold)?;
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "io_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `FACEVAULT_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEVAULT_BACKEND") {
            self.backend = parse_value("FACEVAULT_BACKEND", &v)?;
        }
        if let Some(v) = lookup("FACEVAULT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEVAULT_BLOB_URL") {
            self.blob_url = Some(v);
        }
        if let Some(v) = lookup("FACEVAULT_BLOB_CONTAINER") {
            self.blob_container = v;
        }
        if let Some(v) = lookup("FACEVAULT_BLOB_SAS") {
            self.blob_sas = Some(v);
        }
        if let Some(v) = lookup("FACEVAULT_DOCUMENT_DB") {
            self.document_db = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEVAULT_COLLECTION") {
            self.collection = v;
        }
        if let Some(v) = lookup("FACEVAULT_MODEL") {
            self.model = parse_value("FACEVAULT_MODEL", &v)?;
        }
        if let Some(v) = lookup("FACEVAULT_METRIC") {
            self.metric = parse_value("FACEVAULT_METRIC", &v)?;
        }
        if let Some(v) = lookup("FACEVAULT_THRESHOLD") {
            let threshold = parse_value("FACEVAULT_THRESHOLD", &v)?;
            self.threshold = Some(check_threshold("FACEVAULT_THRESHOLD", threshold)?);
        }
        if let Some(v) = lookup("FACEVAULT_IO_TIMEOUT_MS") {
            self.io_timeout_ms = parse_value("FACEVAULT_IO_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn backend_config(&self) -> Result<BackendConfig, ConfigError> {
        Ok(match self.backend {
            BackendKind::LocalFile => BackendConfig::LocalFile {
                dir: self.data_dir.clone(),
            },
            BackendKind::CloudBlob => {
                let url = self.blob_url.clone().ok_or(ConfigError::MissingBlobUrl)?;
                let mut blob = CloudBlobConfig::new(url, self.blob_container.clone());
                blob.sas_token = self.blob_sas.clone();
                BackendConfig::CloudBlob(blob)
            }
            BackendKind::DocumentStore => BackendConfig::DocumentStore {
                path: self
                    .document_db
                    .clone()
                    .unwrap_or_else(|| self.data_dir.join("documents.db")),
            },
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key: self.collection.clone(),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }

    pub fn engine(&self) -> MatchEngine {
        match self.threshold {
            Some(threshold) => MatchEngine::with_threshold(self.metric, threshold),
            None => MatchEngine::new(self.model, self.metric),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facevault")
}

fn check_threshold(key: &'static str, threshold: f32) -> Result<f32, ConfigError> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(threshold)
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{threshold} is not a finite, non-negative distance"),
        })
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::LocalFile);
        assert_eq!(config.collection, "representations");
        assert_eq!(config.blob_container, "dfdb");
        assert_eq!(config.model, RecognitionModel::Facenet512);
        assert_eq!(config.metric, Metric::Euclidean);
        assert_eq!(config.store_options().io_timeout, Duration::from_secs(10));
        assert!((config.engine().threshold() - 23.56).abs() < 1e-6);
    }

    #[test]
    fn test_toml_file_fields() {
        let config = Config::from_toml(
            r#"
            backend = "document"
            document_db = "/var/lib/facevault/docs.db"
            model = "VGG-Face"
            metric = "cosine"
            io_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::DocumentStore);
        assert_eq!(config.model, RecognitionModel::VggFace);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.collection, "representations");
        match config.backend_config().unwrap() {
            BackendConfig::DocumentStore { path } => {
                assert_eq!(path, PathBuf::from("/var/lib/facevault/docs.db"))
            }
            other => panic!("unexpected backend: {other:?}"),
        }
        assert!((config.engine().threshold() - 0.68).abs() < 1e-6);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("colection = \"x\"").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml("backend = \"document\"\nio_timeout_ms = 1").unwrap();
        config
            .apply_overrides(overrides(&[
                ("FACEVAULT_BACKEND", "blob"),
                ("FACEVAULT_BLOB_URL", "http://127.0.0.1:10000/devstoreaccount1"),
                ("FACEVAULT_BLOB_SAS", "sv=1&sig=x"),
                ("FACEVAULT_IO_TIMEOUT_MS", "750"),
                ("FACEVAULT_THRESHOLD", "0.25"),
            ]))
            .unwrap();

        assert_eq!(config.store_options().io_timeout, Duration::from_millis(750));
        assert!((config.engine().threshold() - 0.25).abs() < 1e-6);
        match config.backend_config().unwrap() {
            BackendConfig::CloudBlob(blob) => {
                assert_eq!(blob.container, "dfdb");
                assert_eq!(blob.sas_token.as_deref(), Some("sv=1&sig=x"));
            }
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(overrides(&[("FACEVAULT_METRIC", "manhattan")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FACEVAULT_METRIC", .. }));

        let err = config
            .apply_overrides(overrides(&[("FACEVAULT_IO_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_threshold_must_be_finite_and_non_negative() {
        for bad in ["NaN", "inf", "-0.5"] {
            let mut config = Config::default();
            let err = config
                .apply_overrides(overrides(&[("FACEVAULT_THRESHOLD", bad)]))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "FACEVAULT_THRESHOLD", .. }),
                "{bad}: {err}"
            );
        }

        let config = Config::from_toml("threshold = -1.0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "threshold", .. })
        ));

        let mut config = Config::default();
        config
            .apply_overrides(overrides(&[("FACEVAULT_THRESHOLD", "0")]))
            .unwrap();
        assert_eq!(config.threshold, Some(0.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_io_timeout_rejected() {
        let config = Config {
            io_timeout_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "io_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_blob_backend_needs_url() {
        let config = Config {
            backend: BackendKind::CloudBlob,
            ..Config::default()
        };
        assert!(matches!(config.backend_config(), Err(ConfigError::MissingBlobUrl)));
    }

    #[test]
    fn test_document_db_defaults_under_data_dir() {
        let config = Config {
            backend: BackendKind::DocumentStore,
            data_dir: PathBuf::from("/srv/facevault"),
            ..Config::default()
        };
        match config.backend_config().unwrap() {
            BackendConfig::DocumentStore { path } => {
                assert_eq!(path, PathBuf::from("/srv/facevault/documents.db"))
            }
            other => panic!("unexpected backend: {other:?}"),
        }
    }
}
