//! Error taxonomy for the training and serving pipeline.
//!
//! Library code returns [`Result`]; the binaries wrap these in `anyhow`
//! with context. The serving layer maps each variant to its own HTTP
//! status (see `server::ApiError`).

use std::io;
use thiserror::Error;

/// Errors raised by the feature contract, vectorizer, model and bundle.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Training-time feature contract violation. Aborts training.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A vectorizer or model was used before it was fitted.
    #[error("Not fitted: {0}")]
    NotFitted(&'static str),

    /// Model input length differs from the fitted feature count.
    #[error("Dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Bundle failed its load-time consistency checks.
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// Request record rejected at the serving boundary.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),

    /// No bundle is currently loaded in the inference engine.
    #[error("No model bundle loaded")]
    ModelNotLoaded,

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Short machine-readable name, used in logs, metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Schema(_) => "schema_error",
            PipelineError::NotFitted(_) => "not_fitted",
            PipelineError::DimensionMismatch { .. } => "dimension_mismatch",
            PipelineError::CorruptArtifact(_) => "corrupt_artifact",
            PipelineError::InvalidRecord(_) => "invalid_record",
            PipelineError::InvalidTrainingData(_) => "invalid_training_data",
            PipelineError::ModelNotLoaded => "model_not_loaded",
            PipelineError::RunNotFound(_) => "run_not_found",
            PipelineError::Io(_) => "io_error",
            PipelineError::Csv(_) => "csv_error",
            PipelineError::Serialization(_) => "serialization_error",
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
