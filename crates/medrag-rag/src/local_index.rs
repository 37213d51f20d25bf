//! In-process vector index with optional JSON persistence

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use medrag_core::{
    check_dimension, check_embedding_model, validate_top_k, CollectionInfo, Error, IndexEntry,
    Result, RetrievalResult, ScoredEntry, SimilarityMetric, VectorIndex,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Collection {
    dimension: usize,
    metric: SimilarityMetric,
    #[serde(default)]
    embedding_model: Option<String>,
    /// Insertion order; replacing an id keeps its slot
    entries: Vec<IndexEntry>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Collection {
    fn new(dimension: usize, metric: SimilarityMetric, embedding_model: &str) -> Self {
        Self {
            dimension,
            metric,
            embedding_model: Some(embedding_model.to_string()),
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.id.clone(), i))
            .collect();
    }

    fn upsert(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    collections: BTreeMap<&'a str, &'a Collection>,
}

#[derive(Deserialize)]
struct Snapshot {
    collections: HashMap<String, Collection>,
}

/// Vector index held in memory and optionally mirrored to a JSON file.
///
/// Writes only touch memory; the file is rewritten on [`VectorIndex::flush`].
/// Queries score every entry, so this suits corpora up to a few tens of
/// thousands of chunks. Use the Qdrant adapter beyond that.
pub struct LocalVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
    data_file: Option<PathBuf>,
    write_lock: Mutex<()>,
    dirty: AtomicBool,
    writes: AtomicUsize,
}

impl LocalVectorIndex {
    /// Create an empty, memory-only index
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_file: None,
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Open an index persisted at `path`, starting empty if the file is absent
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let collections = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot: Snapshot = serde_json::from_str(&content)?;
                let mut collections = snapshot.collections;
                for collection in collections.values_mut() {
                    collection.reindex();
                }
                info!(path = %path.display(), collections = collections.len(), "loaded local index");
                collections
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            collections: RwLock::new(collections),
            data_file: Some(path),
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    /// Number of times the data file has been rewritten
    #[cfg(test)]
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn poisoned<T>(_: T) -> Error {
        Error::IndexUnavailable("index lock poisoned".to_string())
    }

    /// Write the current state to disk via a temp file and rename
    async fn persist(&self, path: &Path) -> Result<()> {
        let content = {
            let collections = self.collections.read().map_err(Self::poisoned)?;
            let snapshot = SnapshotRef {
                collections: collections.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            };
            serde_json::to_string(&snapshot)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path.display(), "persisted local index");
        Ok(())
    }
}

impl Drop for LocalVectorIndex {
    fn drop(&mut self) {
        if let Some(path) = &self.data_file {
            if self.dirty.load(Ordering::SeqCst) {
                warn!(path = %path.display(), "local index dropped with unflushed writes");
            }
        }
    }
}

impl Default for LocalVectorIndex {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: SimilarityMetric,
        embedding_model: &str,
    ) -> Result<()> {
        if dimension == 0 {
            return Err(Error::InvalidConfig(
                "collection dimension must be greater than zero".to_string(),
            ));
        }

        {
            let mut collections = self.collections.write().map_err(Self::poisoned)?;
            if let Some(existing) = collections.get(name) {
                if existing.dimension != dimension {
                    return Err(Error::DimensionMismatch {
                        expected: existing.dimension,
                        actual: dimension,
                    });
                }
                if existing.metric != metric {
                    return Err(Error::InvalidConfig(format!(
                        "collection '{}' uses metric {}, not {}",
                        name, existing.metric, metric
                    )));
                }
                check_embedding_model(existing.embedding_model.as_deref(), embedding_model)?;
            }

            match collections.get_mut(name) {
                Some(existing) if existing.embedding_model.is_none() => {
                    existing.embedding_model = Some(embedding_model.to_string());
                    debug!(collection = name, model = embedding_model, "recorded embedding model");
                }
                Some(_) => return Ok(()),
                None => {
                    collections.insert(
                        name.to_string(),
                        Collection::new(dimension, metric, embedding_model),
                    );
                    info!(collection = name, dimension, %metric, model = embedding_model, "created collection");
                }
            }
        }

        self.mark_dirty();
        Ok(())
    }

    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let written = entries.len();
        {
            let mut collections = self.collections.write().map_err(Self::poisoned)?;
            let target = collections.get_mut(collection).ok_or_else(|| {
                Error::IndexUnavailable(format!("collection '{}' does not exist", collection))
            })?;

            // Reject the whole batch before touching any slot
            for entry in &entries {
                check_dimension(target.dimension, &entry.vector)?;
            }
            for entry in entries {
                target.upsert(entry);
            }
        }

        self.mark_dirty();
        debug!(collection, written, "upserted entries");
        Ok(written)
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        validate_top_k(k)?;

        let collections = self.collections.read().map_err(Self::poisoned)?;
        let target = collections.get(collection).ok_or_else(|| {
            Error::IndexUnavailable(format!("collection '{}' does not exist", collection))
        })?;
        check_dimension(target.dimension, vector)?;

        let mut scored: Vec<ScoredEntry> = target
            .entries
            .iter()
            .map(|entry| ScoredEntry {
                score: target.metric.score(vector, &entry.vector),
                entry: entry.clone(),
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(RetrievalResult::new(scored))
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.collections.read().map_err(Self::poisoned)?;
        Ok(collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            dimension: c.dimension,
            metric: c.metric,
            entries: c.entries.len(),
            embedding_model: c.embedding_model.clone(),
        }))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let removed = self
            .collections
            .write()
            .map_err(Self::poisoned)?
            .remove(name)
            .is_some();

        if removed {
            info!(collection = name, "deleted collection");
            self.mark_dirty();
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let persisted = self.persist(path).await;
        if persisted.is_err() {
            self.mark_dirty();
        }
        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::Metadata;

    const MODEL: &str = "test-model";

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("text {}", id),
            metadata: Metadata::new(),
        }
    }

    async fn index_with(entries: Vec<IndexEntry>) -> LocalVectorIndex {
        let index = LocalVectorIndex::in_memory();
        index
            .create_collection("test", 3, SimilarityMetric::Cosine, MODEL)
            .await
            .unwrap();
        index.upsert("test", entries).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_query_returns_top_k_in_order() {
        let index = index_with(vec![
            entry("e1", vec![1.0, 0.0, 0.0]),
            entry("e2", vec![0.0, 1.0, 0.0]),
            entry("e3", vec![0.9, 0.1, 0.0]),
            entry("e4", vec![0.0, 0.0, 1.0]),
            entry("e5", vec![0.7, 0.7, 0.0]),
        ])
        .await;

        let result = index.query("test", &[1.0, 0.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = result.iter().map(|s| s.entry.id.as_str()).collect();

        assert_eq!(ids, vec!["e1", "e3", "e5"]);
        assert!(result.entries.windows(2).all(|w| w[0].score >= w[1].score));
        assert!((result.entries[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_k_larger_than_collection() {
        let index = index_with(vec![entry("only", vec![0.0, 1.0, 0.0])]).await;
        let result = index.query("test", &[0.0, 1.0, 0.0], 10).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_collection_query_is_empty() {
        let index = index_with(Vec::new()).await;
        let result = index.query("test", &[1.0, 0.0, 0.0], 3).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = index_with(vec![
            entry("first", vec![1.0, 0.0, 0.0]),
            entry("second", vec![2.0, 0.0, 0.0]),
            entry("third", vec![3.0, 0.0, 0.0]),
        ])
        .await;

        let result = index.query("test", &[1.0, 0.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = result.iter().map(|s| s.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = index_with(vec![entry("a", vec![1.0, 0.0, 0.0])]).await;

        let mut replacement = entry("a", vec![0.0, 1.0, 0.0]);
        replacement.text = "updated".to_string();
        index.upsert("test", vec![replacement.clone()]).await.unwrap();
        index.upsert("test", vec![replacement]).await.unwrap();

        assert_eq!(index.count("test").await.unwrap(), 1);

        let result = index.query("test", &[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(result.entries[0].entry.text, "updated");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let index = index_with(Vec::new()).await;

        let result = index
            .upsert(
                "test",
                vec![entry("ok", vec![1.0, 0.0, 0.0]), entry("bad", vec![1.0, 0.0])],
            )
            .await;
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(index.collection_info("test").await.unwrap().unwrap().entries, 0);

        assert!(matches!(
            index.query("test", &[1.0; 4], 1).await,
            Err(Error::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_recreate_with_other_dimension_fails() {
        let index = index_with(Vec::new()).await;
        assert!(index
            .create_collection("test", 3, SimilarityMetric::Cosine, MODEL)
            .await
            .is_ok());
        assert!(matches!(
            index.create_collection("test", 768, SimilarityMetric::Cosine, MODEL).await,
            Err(Error::DimensionMismatch { expected: 3, actual: 768 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_collection_and_zero_k() {
        let index = LocalVectorIndex::in_memory();
        assert!(matches!(
            index.query("missing", &[1.0], 1).await,
            Err(Error::IndexUnavailable(_))
        ));
        assert!(matches!(
            index.upsert("missing", vec![entry("a", vec![1.0])]).await,
            Err(Error::IndexUnavailable(_))
        ));

        let index = index_with(Vec::new()).await;
        assert!(matches!(
            index.query("test", &[1.0, 0.0, 0.0], 0).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let index = index_with(vec![entry("a", vec![1.0, 0.0, 0.0])]).await;
        assert!(index.collection_exists("test").await.unwrap());

        index.delete_collection("test").await.unwrap();
        assert!(!index.collection_exists("test").await.unwrap());
        assert!(matches!(
            index.count("test").await,
            Err(Error::IndexUnavailable(_))
        ));
        index.delete_collection("test").await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("vectors.json");

        {
            let index = LocalVectorIndex::open(&path).await.unwrap();
            index
                .create_collection("medicalbot", 3, SimilarityMetric::Cosine, MODEL)
                .await
                .unwrap();
            index
                .upsert(
                    "medicalbot",
                    vec![entry("a", vec![1.0, 0.0, 0.0]), entry("b", vec![0.0, 1.0, 0.0])],
                )
                .await
                .unwrap();
            index.flush().await.unwrap();
        }

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = LocalVectorIndex::open(&path).await.unwrap();
        let info = reopened.collection_info("medicalbot").await.unwrap().unwrap();
        assert_eq!(info.dimension, 3);
        assert_eq!(info.entries, 2);

        // Positions are rebuilt, so replacing keeps the count
        reopened
            .upsert("medicalbot", vec![entry("a", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        let result = reopened.query("medicalbot", &[0.0, 0.0, 1.0], 1).await.unwrap();
        assert_eq!(result.entries[0].entry.id, "a");
        assert_eq!(
            reopened.collection_info("medicalbot").await.unwrap().unwrap().entries,
            2
        );
    }

    #[tokio::test]
    async fn test_writes_reach_disk_only_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let index = LocalVectorIndex::open(&path).await.unwrap();

        index
            .create_collection("medicalbot", 3, SimilarityMetric::Cosine, MODEL)
            .await
            .unwrap();
        for i in 0..10 {
            index
                .upsert("medicalbot", vec![entry(&format!("e{}", i), vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }
        assert_eq!(index.writes(), 0);
        assert!(!path.exists());

        index.flush().await.unwrap();
        index.flush().await.unwrap();
        assert_eq!(index.writes(), 1);

        let reopened = LocalVectorIndex::open(&path).await.unwrap();
        assert_eq!(reopened.count("medicalbot").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_in_memory_flush_is_noop() {
        let index = index_with(vec![entry("a", vec![1.0, 0.0, 0.0])]).await;
        index.flush().await.unwrap();
        assert_eq!(index.writes(), 0);
    }

    #[tokio::test]
    async fn test_recreate_with_other_model_fails() {
        let index = index_with(Vec::new()).await;
        assert_eq!(
            index.collection_info("test").await.unwrap().unwrap().embedding_model.as_deref(),
            Some(MODEL)
        );

        match index
            .create_collection("test", 3, SimilarityMetric::Cosine, "other-model")
            .await
        {
            Err(Error::ModelMismatch { expected, actual }) => {
                assert_eq!(expected, MODEL);
                assert_eq!(actual, "other-model");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_untracked_collection_adopts_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        std::fs::write(
            &path,
            r#"{"collections":{"medicalbot":{"dimension":3,"metric":"cosine","entries":[]}}}"#,
        )
        .unwrap();

        let index = LocalVectorIndex::open(&path).await.unwrap();
        let info = index.collection_info("medicalbot").await.unwrap().unwrap();
        assert!(info.embedding_model.is_none());

        index
            .create_collection("medicalbot", 3, SimilarityMetric::Cosine, MODEL)
            .await
            .unwrap();
        index.flush().await.unwrap();

        let reopened = LocalVectorIndex::open(&path).await.unwrap();
        let info = reopened.collection_info("medicalbot").await.unwrap().unwrap();
        assert_eq!(info.embedding_model.as_deref(), Some(MODEL));
    }

    #[tokio::test]
    async fn test_open_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            LocalVectorIndex::open(&path).await,
            Err(Error::Serialization(_))
        ));
    }
}
