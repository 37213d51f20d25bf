//! Chunking, ingestion and retrieval configuration

use serde::{Deserialize, Serialize};

use crate::{Error, Result, SimilarityMetric};

/// Configuration for splitting documents into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in chars
    pub chunk_size: usize,
    /// Chars shared by consecutive chunks of one document
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 20,
        }
    }
}

impl ChunkingConfig {
    /// Create and validate a chunking configuration
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Require `0 <= overlap < size`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Configuration for one ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub chunking: ChunkingConfig,
    /// Chunks embedded and upserted per backend call
    pub batch_size: usize,
    pub metric: SimilarityMetric,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 32,
            metric: SimilarityMetric::Cosine,
        }
    }
}

impl IngestionConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the query side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of entries retrieved per question
    pub top_k: usize,
    /// Total chars of retrieved text placed in the prompt
    pub context_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            context_budget: 2000,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}
