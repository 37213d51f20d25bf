//! Embedding service trait

use async_trait::async_trait;

use crate::{EmbeddingVector, Result};

/// Trait for embedding services
///
/// One instance is constructed at start-up and shared by the ingestion
/// pipeline and the RAG chain, so both sides always embed with the same
/// model and dimension.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order
    async fn embed(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed(&[text]).await?;
        vectors.pop().ok_or_else(|| {
            crate::Error::EmbeddingUnavailable("embedding backend returned no vector".to_string())
        })
    }

    /// Dimension of every vector this service produces
    fn dimension(&self) -> usize;

    /// Identifier of the underlying model
    fn model_id(&self) -> &str;
}
