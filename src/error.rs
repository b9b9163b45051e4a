//! Error types for the training pipeline and inference service

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MlError>;

#[derive(Error, Debug)]
pub enum MlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Target column {0} missing from dataset")]
    MissingTarget(String),

    #[error("Unknown output format: {0}")]
    UnknownFormat(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model not fitted")]
    NotFitted,

    #[error("Model artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MlError {
    /// Attach a path to an I/O failure
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MlError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for MlError {
    fn from(err: config::ConfigError) -> Self {
        MlError::Config(err.to_string())
    }
}
