//! Embedding service implementations

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use medrag_core::{EmbeddingService, EmbeddingVector, Error, Result};

/// Dimension of the sentence-transformer family the corpus is indexed with
pub const DEFAULT_DIMENSION: usize = 384;

/// Offline embedder built from hashed word and bigram features.
///
/// Hashing uses md5 so the same text maps to the same vector in every
/// process; an index built yesterday stays queryable today.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const MODEL_ID: &'static str = "medrag/hashed-bigrams";

    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfig(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn feature_hash(feature: &str) -> u64 {
        let digest = md5::compute(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.0[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Generate simple hash-based embeddings for text
    fn embed_text(&self, text: &str) -> EmbeddingVector {
        let normalized_text = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>();

        let words: Vec<&str> = normalized_text.split_whitespace().collect();
        let mut embedding = vec![0.0f32; self.dimension];
        let dimension = self.dimension as u64;

        for (i, word) in words.iter().enumerate() {
            let hash = Self::feature_hash(word);
            let weight = 1.0 / (1.0 + i as f32 * 0.1);
            embedding[(hash % dimension) as usize] += weight;

            if word.chars().count() > 3 {
                let secondary_idx = ((hash >> 16) % dimension) as usize;
                embedding[secondary_idx] += weight * 0.5;
            }
        }

        for window in words.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            let idx = (Self::feature_hash(&bigram) % dimension) as usize;
            embedding[idx] += 0.3;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [&'a str],
    normalize: bool,
}

/// Client for a text-embeddings-inference style `/embed` endpoint
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
    dimension: usize,
}

impl RemoteEmbedder {
    pub const DEFAULT_MODEL: &'static str = "sentence-transformers/all-MiniLM-L6-v2";

    /// Create a client; `base_url` is the server root, e.g. `http://localhost:8080`
    pub fn new(base_url: &str, model_id: impl Into<String>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfig(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
            model_id: model_id.into(),
            dimension,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check a decoded response against the request
    fn validate(&self, expected: usize, vectors: Vec<EmbeddingVector>) -> Result<Vec<EmbeddingVector>> {
        if vectors.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} vectors, backend returned {}",
                expected,
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(endpoint = %self.endpoint, batch_size = texts.len(), "embedding batch");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs: texts,
                normalize: true,
            })
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "embedding request failed");
                Error::EmbeddingUnavailable(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        let vectors: Vec<EmbeddingVector> = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed response: {}", e)))?;

        self.validate(texts.len(), vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
