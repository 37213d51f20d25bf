//! Environment-driven settings and component wiring

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use medrag_core::{
    ChunkingConfig, EmbeddingService, Error, GenerationConfig, GenerationService,
    IngestionConfig, Result, RetrievalConfig, SimilarityMetric, VectorIndex,
};
use medrag_llm::{GeminiClient, WatsonxClient};
use medrag_rag::{HashEmbedder, LocalVectorIndex, QdrantVectorIndex, RemoteEmbedder};

pub const DEFAULT_COLLECTION: &str = "medicalbot";
const DEFAULT_INDEX_PATH: &str = ".medrag/index.json";

#[derive(Debug, Clone, PartialEq)]
pub enum IndexBackend {
    Local { path: PathBuf },
    Qdrant { url: String, api_key: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingBackend {
    /// Offline hashed features
    Hash,
    Remote { url: String, model: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    Gemini,
    Watsonx,
}

impl FromStr for GenerationProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "watsonx" | "ibm" => Ok(Self::Watsonx),
            other => Err(Error::InvalidConfig(format!(
                "unknown GENERATION_PROVIDER '{}', expected gemini or watsonx",
                other
            ))),
        }
    }
}

/// Everything the binary needs to build a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub collection: String,
    pub index: IndexBackend,
    pub embedding: EmbeddingBackend,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub provider: GenerationProvider,
    pub watsonx_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl RagSettings {
    /// Read settings from the process environment, loading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let index = match var("INDEX_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("local") => IndexBackend::Local {
                path: var("LOCAL_INDEX_PATH")
                    .unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string())
                    .into(),
            },
            Some("qdrant") => IndexBackend::Qdrant {
                url: var("QDRANT_URL").unwrap_or_else(|| QdrantVectorIndex::DEFAULT_URL.to_string()),
                api_key: var("QDRANT_API_KEY"),
            },
            Some(other) => {
                return Err(Error::InvalidConfig(format!(
                    "unknown INDEX_BACKEND '{}', expected local or qdrant",
                    other
                )));
            }
        };

        let embedding = match var("EMBEDDING_URL") {
            Some(url) => EmbeddingBackend::Remote {
                url,
                model: var("EMBEDDING_MODEL")
                    .unwrap_or_else(|| RemoteEmbedder::DEFAULT_MODEL.to_string()),
            },
            None => EmbeddingBackend::Hash,
        };

        let metric = match var("SIMILARITY_METRIC") {
            Some(value) => SimilarityMetric::parse(&value)?,
            None => SimilarityMetric::Cosine,
        };

        let defaults = ChunkingConfig::default();
        let chunking = ChunkingConfig::new(
            parse_var(&var, "CHUNK_SIZE", defaults.chunk_size)?,
            parse_var(&var, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
        )?;

        let retrieval_defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: parse_var(&var, "TOP_K", retrieval_defaults.top_k)?,
            context_budget: parse_var(&var, "CONTEXT_BUDGET", retrieval_defaults.context_budget)?,
        };
        retrieval.validate()?;

        let generation_defaults = GenerationConfig::default();
        let settings = Self {
            collection: var("MEDRAG_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            index,
            embedding,
            dimension: parse_var(&var, "EMBEDDING_DIMENSION", medrag_rag::DEFAULT_DIMENSION)?,
            metric,
            chunking,
            retrieval,
            provider: match var("GENERATION_PROVIDER") {
                Some(value) => value.parse()?,
                None => GenerationProvider::Gemini,
            },
            watsonx_model: var("WATSONX_MODEL")
                .unwrap_or_else(|| WatsonxClient::GRANITE_4_H_SMALL.to_string()),
            max_tokens: parse_var(&var, "MAX_TOKENS", generation_defaults.max_tokens)?,
            temperature: parse_var(&var, "TEMPERATURE", generation_defaults.temperature)?,
        };

        if settings.dimension == 0 {
            return Err(Error::InvalidConfig(
                "EMBEDDING_DIMENSION must be greater than zero".to_string(),
            ));
        }

        Ok(settings)
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            chunking: self.chunking,
            metric: self.metric,
            ..Default::default()
        }
    }

    /// Generation parameters for a backend serving `model_id`
    pub fn generation_config(&self, model_id: &str) -> GenerationConfig {
        GenerationConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..Default::default()
        }
        .with_model(model_id)
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingService>> {
        let embedder: Arc<dyn EmbeddingService> = match &self.embedding {
            EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(self.dimension)?),
            EmbeddingBackend::Remote { url, model } => {
                Arc::new(RemoteEmbedder::new(url, model.clone(), self.dimension)?)
            }
        };
        Ok(embedder)
    }

    pub async fn build_index(&self) -> Result<Arc<dyn VectorIndex>> {
        let index: Arc<dyn VectorIndex> = match &self.index {
            IndexBackend::Local { path } => {
                info!(path = %path.display(), "using local vector index");
                Arc::new(LocalVectorIndex::open(path).await?)
            }
            IndexBackend::Qdrant { url, api_key } => {
                info!(url = %url, "using qdrant vector index");
                Arc::new(QdrantVectorIndex::new(url, api_key.clone())?)
            }
        };
        Ok(index)
    }

    pub async fn build_generator(&self) -> Result<Arc<dyn GenerationService>> {
        let generator: Arc<dyn GenerationService> = match self.provider {
            GenerationProvider::Gemini => Arc::new(GeminiClient::from_env()?),
            GenerationProvider::Watsonx => {
                let client = WatsonxClient::from_env()?.with_model(self.watsonx_model.clone());
                client.connect().await?;
                Arc::new(client)
            }
        };
        Ok(generator)
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match var(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            Error::InvalidConfig(format!("{} has an invalid value '{}'", name, value))
        }),
        None => Ok(default),
    }
}
