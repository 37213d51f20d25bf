//! Qdrant-backed vector index

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfig;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use medrag_core::{
    check_dimension, check_embedding_model, validate_top_k, CollectionInfo, Error, IndexEntry,
    Metadata, Result, RetrievalResult, ScoredEntry, SimilarityMetric, VectorIndex,
    EMBEDDING_MODEL_KEY,
};

/// Vector index stored in a Qdrant collection.
///
/// Entry ids are arbitrary strings while Qdrant wants UUIDs, so each point
/// id is derived from the md5 of the entry id and the entry id itself travels in
/// the payload. Retrieved entries carry an empty vector.
///
/// Qdrant keeps no insertion order, so equal scores are ordered by entry id
/// rather than by when the entries were written. The embedding model of a
/// collection is read back from the `embedding_model` metadata of a stored
/// point; an empty collection has no recorded model.
pub struct QdrantVectorIndex {
    client: Qdrant,
    dimensions: RwLock<HashMap<String, usize>>,
}

impl QdrantVectorIndex {
    pub const DEFAULT_URL: &'static str = "http://localhost:6334";

    /// Connect to Qdrant at `url`, optionally with an API key
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(Self::map_err)?;

        Ok(Self {
            client,
            dimensions: RwLock::new(HashMap::new()),
        })
    }

    fn map_err(e: QdrantError) -> Error {
        Error::IndexUnavailable(format!("qdrant: {}", e))
    }

    /// Deterministic point id for an entry id
    pub fn point_id(entry_id: &str) -> String {
        Uuid::from_bytes(md5::compute(entry_id.as_bytes()).0).to_string()
    }

    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn payload_for(entry: &IndexEntry) -> Result<Payload> {
        let metadata: serde_json::Map<String, serde_json::Value> = entry
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let payload = serde_json::json!({
            "entry_id": entry.id,
            "text": entry.text,
            "metadata": metadata,
        });

        Payload::try_from(payload).map_err(Self::map_err)
    }

    fn entry_from_payload(payload: &HashMap<String, QdrantValue>) -> IndexEntry {
        let metadata: Metadata = payload
            .get("metadata")
            .and_then(|v| match &v.kind {
                Some(Kind::StructValue(s)) => Some(
                    s.fields
                        .iter()
                        .filter_map(|(k, v)| Self::extract_string(v).map(|s| (k.clone(), s)))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        IndexEntry {
            id: payload
                .get("entry_id")
                .and_then(Self::extract_string)
                .unwrap_or_default(),
            vector: Vec::new(),
            text: payload
                .get("text")
                .and_then(Self::extract_string)
                .unwrap_or_default(),
            metadata,
        }
    }

    /// Embedding model recorded on any stored point of `collection`
    async fn recorded_model(&self, collection: &str) -> Result<Option<String>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(Self::map_err)?;

        Ok(response.result.first().and_then(|point| {
            Self::entry_from_payload(&point.payload)
                .metadata
                .remove(EMBEDDING_MODEL_KEY)
        }))
    }

    /// Collection dimension, from cache or the server
    async fn dimension_of(&self, collection: &str) -> Result<usize> {
        let cached = self
            .dimensions
            .read()
            .map_err(|_| Error::IndexUnavailable("dimension cache poisoned".to_string()))?
            .get(collection)
            .copied();
        if let Some(dimension) = cached {
            return Ok(dimension);
        }

        let info = self.collection_info(collection).await?.ok_or_else(|| {
            Error::IndexUnavailable(format!("collection '{}' does not exist", collection))
        })?;
        Ok(info.dimension)
    }

    fn remember_dimension(&self, collection: &str, dimension: usize) {
        if let Ok(mut cache) = self.dimensions.write() {
            cache.insert(collection.to_string(), dimension);
        }
    }

    fn forget_dimension(&self, collection: &str) {
        if let Ok(mut cache) = self.dimensions.write() {
            cache.remove(collection);
        }
    }

    /// Map a failed call on `collection`, dropping its cached dimension
    /// in case the collection was recreated elsewhere
    fn collection_err(&self, collection: &str, e: QdrantError) -> Error {
        self.forget_dimension(collection);
        Self::map_err(e)
    }
}

/// Order by descending score, equal scores by entry id
fn rank(entries: &mut [ScoredEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
}

fn distance_for(metric: SimilarityMetric) -> Distance {
    match metric {
        SimilarityMetric::Cosine => Distance::Cosine,
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: SimilarityMetric,
        embedding_model: &str,
    ) -> Result<()> {
        if let Some(existing) = self.collection_info(name).await? {
            if existing.dimension != dimension {
                return Err(Error::DimensionMismatch {
                    expected: existing.dimension,
                    actual: dimension,
                });
            }
            check_embedding_model(existing.embedding_model.as_deref(), embedding_model)?;
            debug!(collection = name, "qdrant collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    dimension as u64,
                    distance_for(metric),
                )),
            )
            .await
            .map_err(Self::map_err)?;

        self.remember_dimension(name, dimension);
        info!(collection = name, dimension, %metric, model = embedding_model, "created qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let dimension = self.dimension_of(collection).await?;
        for entry in &entries {
            check_dimension(dimension, &entry.vector)?;
        }

        let written = entries.len();
        let points = entries
            .into_iter()
            .map(|entry| {
                let payload = Self::payload_for(&entry)?;
                Ok(PointStruct::new(
                    Self::point_id(&entry.id),
                    entry.vector,
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| self.collection_err(collection, e))?;

        debug!(collection, written, "upserted points to qdrant");
        Ok(written)
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        validate_top_k(k)?;
        let dimension = self.dimension_of(collection).await?;
        check_dimension(dimension, vector)?;

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, vector.to_vec(), k as u64).with_payload(true),
            )
            .await
            .map_err(|e| self.collection_err(collection, e))?;

        let mut entries: Vec<ScoredEntry> = response
            .result
            .into_iter()
            .map(|scored| ScoredEntry {
                entry: Self::entry_from_payload(&scored.payload),
                score: scored.score,
            })
            .collect();
        rank(&mut entries);

        Ok(RetrievalResult::new(entries))
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(Self::map_err)?;
        if !exists {
            return Ok(None);
        }

        let response = self
            .client
            .collection_info(name)
            .await
            .map_err(Self::map_err)?;
        let info = response.result.ok_or_else(|| {
            Error::IndexUnavailable(format!("qdrant returned no info for '{}'", name))
        })?;

        let dimension = info
            .config
            .as_ref()
            .and_then(|config| config.params.as_ref())
            .and_then(|params| params.vectors_config.as_ref())
            .and_then(|vectors| vectors.config.as_ref())
            .and_then(|config| match config {
                VectorsConfig::Params(params) => Some(params.size as usize),
                VectorsConfig::ParamsMap(_) => None,
            })
            .ok_or_else(|| {
                Error::IndexUnavailable(format!(
                    "collection '{}' does not use a single unnamed vector",
                    name
                ))
            })?;

        self.remember_dimension(name, dimension);

        let entries = info.points_count.unwrap_or(0) as usize;
        let embedding_model = if entries > 0 {
            self.recorded_model(name).await?
        } else {
            None
        };

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension,
            metric: SimilarityMetric::Cosine,
            entries,
            embedding_model,
        }))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client
            .delete_collection(name)
            .await
            .map_err(Self::map_err)?;
        self.forget_dimension(name);
        info!(collection = name, "deleted qdrant collection");
        Ok(())
    }
}
