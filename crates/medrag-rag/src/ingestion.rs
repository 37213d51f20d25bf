//! Offline ingestion: documents to chunks to vectors to the index

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use medrag_core::{
    Chunk, Document, EmbeddingService, Error, IndexEntry, IngestionConfig, Result, VectorIndex,
    EMBEDDING_MODEL_KEY,
};

use crate::chunker::Chunker;
use crate::loader;

/// Summary of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub collection: String,
    pub documents: usize,
    pub chunks_written: usize,
}

/// Chunks, embeds and upserts documents into one collection.
///
/// Entry ids are `{document_id}#{sequence}`, so running the pipeline twice
/// over the same corpus leaves the index unchanged. The index is flushed
/// once at the end of each run, whether or not the run succeeded.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        config: IngestionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            index,
            chunker: Chunker::new(config.chunking)?,
            config,
        })
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Ingest documents into `collection`, creating it on first use
    pub async fn ingest(&self, collection: &str, documents: &[Document]) -> Result<IngestionReport> {
        self.index
            .create_collection(
                collection,
                self.embedder.dimension(),
                self.config.metric,
                self.embedder.model_id(),
            )
            .await?;

        let written = self.write_documents(collection, documents).await;
        let flushed = self.index.flush().await;
        let chunks_written = written?;
        flushed?;

        info!(collection, chunks_written, "ingestion complete");

        Ok(IngestionReport {
            collection: collection.to_string(),
            documents: documents.len(),
            chunks_written,
        })
    }

    /// Load a directory with the corpus loader and ingest everything in it
    pub async fn ingest_directory(&self, dir: &Path, collection: &str) -> Result<IngestionReport> {
        let documents = loader::load_directory(dir).await?;
        self.ingest(collection, &documents).await
    }

    async fn write_documents(&self, collection: &str, documents: &[Document]) -> Result<usize> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|document| self.chunker.chunk(document))
            .collect();

        info!(
            collection,
            documents = documents.len(),
            chunks = chunks.len(),
            model = self.embedder.model_id(),
            "ingesting documents"
        );

        let ingested_at = chrono::Utc::now().to_rfc3339();
        let mut chunks_written = 0;

        for (batch, batch_chunks) in chunks.chunks(self.config.batch_size).enumerate() {
            let failed = |source: Error| Error::IngestionFailed {
                document_id: batch_chunks[0].document_id.clone(),
                batch,
                source: Box::new(source),
            };

            let entries = self
                .embed_batch(batch_chunks, &ingested_at)
                .await
                .map_err(failed)?;
            chunks_written += self
                .index
                .upsert(collection, entries)
                .await
                .map_err(failed)?;

            debug!(collection, batch, written = chunks_written, "batch complete");
        }

        Ok(chunks_written)
    }

    async fn embed_batch(&self, chunks: &[Chunk], ingested_at: &str) -> Result<Vec<IndexEntry>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut metadata = chunk.metadata.clone();
                metadata.insert("ingested_at".to_string(), ingested_at.to_string());
                metadata.insert(
                    EMBEDDING_MODEL_KEY.to_string(),
                    self.embedder.model_id().to_string(),
                );
                IndexEntry {
                    id: chunk.entry_id(),
                    vector,
                    text: chunk.text.clone(),
                    metadata,
                }
            })
            .collect())
    }
}
