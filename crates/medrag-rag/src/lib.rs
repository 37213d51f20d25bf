//! Retrieval-augmented generation pipeline for MedRAG
//!
//! This crate provides the chunker, embedding and vector index adapters,
//! the offline ingestion pipeline and the query-time RAG chain.

pub mod chain;
pub mod chunker;
mod embedder;
mod ingestion;
pub mod loader;
mod local_index;
pub mod prompt;
mod qdrant_index;

#[cfg(test)]
mod tests;

pub use chain::{Answer, ChainFailure, ChainState, RagChain};
pub use chunker::{reassemble, Chunker};
pub use embedder::{HashEmbedder, RemoteEmbedder, DEFAULT_DIMENSION};
pub use ingestion::{IngestionPipeline, IngestionReport};
pub use local_index::LocalVectorIndex;
pub use prompt::{Prompt, PromptTemplate};
pub use qdrant_index::QdrantVectorIndex;

// Re-export core types for convenience
pub use medrag_core::{
    Chunk, ChunkingConfig, CollectionInfo, Document, EmbeddingService, Error, IndexEntry,
    IngestionConfig, Result, RetrievalConfig, RetrievalResult, SimilarityMetric, VectorIndex,
};
