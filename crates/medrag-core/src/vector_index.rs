//! Vector index trait and similarity metric

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, IndexEntry, Result, RetrievalResult};

/// Similarity metric fixed for the lifetime of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
}

impl SimilarityMetric {
    /// Parse from string
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            other => Err(Error::InvalidConfig(format!(
                "unsupported similarity metric '{}'",
                other
            ))),
        }
    }

    /// Score two vectors of equal length; higher is more similar
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(a, b),
        }
    }
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimilarityMetric::Cosine => write!(f, "cosine"),
        }
    }
}

/// Cosine similarity `(A·B)/(‖A‖‖B‖)`, in [-1, 1].
///
/// Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Metadata key under which ingested entries record their embedding model
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";

/// Shape of a named collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub entries: usize,
    /// Model the stored vectors came from, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

/// Trait for vector indexes (e.g., local JSON-backed store, Qdrant)
///
/// Collections are addressed by name. Creating a collection fixes its
/// dimension, metric and embedding model; they cannot change without a
/// full rebuild.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a collection, or verify an existing one has the same shape
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: SimilarityMetric,
        embedding_model: &str,
    ) -> Result<()>;

    /// Insert or replace entries by id; returns the number written
    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<usize>;

    /// Return the `k` entries most similar to `vector`
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult>;

    /// Describe a collection, or `None` if it does not exist
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Drop a collection and every entry in it
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Make buffered writes durable.
    ///
    /// Backends that write through on every call keep the default no-op.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Check whether a collection exists
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collection_info(name).await?.is_some())
    }

    /// Number of entries in a collection
    async fn count(&self, name: &str) -> Result<usize> {
        self.collection_info(name)
            .await?
            .map(|info| info.entries)
            .ok_or_else(|| Error::IndexUnavailable(format!("collection '{}' does not exist", name)))
    }
}

/// Reject `k == 0` before touching a backend
pub fn validate_top_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidConfig("k must be at least 1".to_string()));
    }
    Ok(())
}

/// Reject vectors whose length differs from the collection dimension
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Reject an embedding model other than the one a collection was built with.
///
/// Collections that predate model tracking (`None`) accept any model.
pub fn check_embedding_model(recorded: Option<&str>, actual: &str) -> Result<()> {
    match recorded {
        Some(expected) if expected != actual => Err(Error::ModelMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let vec1 = vec![1.0, 0.0, 0.0];
        let vec2 = vec![1.0, 0.0, 0.0];
        let vec3 = vec![0.0, 1.0, 0.0];
        let vec4 = vec![-2.0, 0.0, 0.0];

        assert!((cosine_similarity(&vec1, &vec2) - 1.0).abs() < 0.001);
        assert!((cosine_similarity(&vec1, &vec3) - 0.0).abs() < 0.001);
        assert!((cosine_similarity(&vec1, &vec4) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_is_magnitude_independent() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!(SimilarityMetric::parse("Cosine").unwrap(), SimilarityMetric::Cosine);
        assert!(matches!(
            SimilarityMetric::parse("dotproduct"),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(SimilarityMetric::Cosine.to_string(), "cosine");
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, &[0.1, 0.2, 0.3]).is_ok());
        match check_dimension(384, &[0.1, 0.2]) {
            Err(Error::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 384);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_check_embedding_model() {
        assert!(check_embedding_model(Some("hash"), "hash").is_ok());
        assert!(check_embedding_model(None, "minilm").is_ok());
        assert!(matches!(
            check_embedding_model(Some("hash"), "minilm"),
            Err(Error::ModelMismatch { expected, actual }) if expected == "hash" && actual == "minilm"
        ));
    }

    #[test]
    fn test_validate_top_k() {
        assert!(validate_top_k(1).is_ok());
        assert!(matches!(validate_top_k(0), Err(Error::InvalidConfig(_))));
    }
}
