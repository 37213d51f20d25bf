//! Error types for MedRAG

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy shared by the ingestion and query pipelines
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model mismatch: collection was built with '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    #[error("Ingestion failed for document '{document_id}' at batch {batch}: {source}")]
    IngestionFailed {
        document_id: String,
        batch: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Short, stable tag naming the failure kind.
    ///
    /// Used for operator-facing log fields; never contains backend detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "invalid_config",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::ModelMismatch { .. } => "model_mismatch",
            Error::GenerationFailure(_) => "generation_failure",
            Error::IngestionFailed { .. } => "ingestion_failed",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
