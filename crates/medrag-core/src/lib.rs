//! Core traits and types for MedRAG
//!
//! This crate defines the data model, the error taxonomy and the three
//! service seams of the retrieval-augmented generation pipeline: embedding,
//! vector indexing and text generation. Concrete adapters live in
//! `medrag-rag` and `medrag-llm`.

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

pub use config::{ChunkingConfig, IngestionConfig, RetrievalConfig};
pub use embedding::EmbeddingService;
pub use error::{Error, Result};
pub use llm::{GenerationConfig, GenerationResult, GenerationService};
pub use types::*;
pub use vector_index::{
    check_dimension, check_embedding_model, cosine_similarity, validate_top_k, CollectionInfo,
    SimilarityMetric, VectorIndex, EMBEDDING_MODEL_KEY,
};
