//! Crate-wide error type

use thiserror::Error;

/// Errors produced by the pipeline and trainers
#[derive(Error, Debug)]
pub enum TripcastError {
    /// A required column is absent under every known naming convention
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Data could not be read, parsed or converted
    #[error("Data error: {0}")]
    DataError(String),

    /// A required configuration key is missing or invalid
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Model fitting failed
    #[error("Training error: {0}")]
    TrainingError(String),

    /// Predict called before fit
    #[error("Model is not fitted yet")]
    ModelNotFitted,

    /// Array dimensions do not line up
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    /// Artifact could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TripcastError>;
