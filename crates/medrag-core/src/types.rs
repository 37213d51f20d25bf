//! Data model shared by the ingestion and query pipelines

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fixed-length embedding produced from a chunk or a query string
pub type EmbeddingVector = Vec<f32>;

/// String metadata attached to chunks and index entries
pub type Metadata = BTreeMap<String, String>;

/// A source document produced by the corpus loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    /// Origin path of the document
    pub source: String,
    /// 1-based page number when the source is paginated
    pub page: Option<u32>,
}

impl Document {
    /// Create a document without page information
    pub fn new(id: impl Into<String>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            page: None,
        }
    }

    /// Set the page number
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Source metadata inherited by every chunk of this document
    pub fn source_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("document_id".to_string(), self.id.clone());
        metadata.insert("source".to_string(), self.source.clone());
        if let Some(page) = self.page {
            metadata.insert("page".to_string(), page.to_string());
        }
        metadata
    }
}

/// A bounded-length segment of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub sequence: usize,
    pub text: String,
    /// Number of leading chars shared with the preceding chunk
    pub overlap: usize,
    pub metadata: Metadata,
}

impl Chunk {
    /// Stable index id: re-ingesting the same document overwrites rather than duplicates
    pub fn entry_id(&self) -> String {
        format!("{}#{}", self.document_id, self.sequence)
    }
}

/// A stored (id, vector, text, metadata) record owned by a vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: EmbeddingVector,
    pub text: String,
    pub metadata: Metadata,
}

/// One retrieved entry and its similarity to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Entries for one query, ordered by descending similarity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub entries: Vec<ScoredEntry>,
}

impl RetrievalResult {
    pub fn new(entries: Vec<ScoredEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredEntry> {
        self.entries.iter()
    }

    /// Highest-ranked entry, if any
    pub fn top(&self) -> Option<&ScoredEntry> {
        self.entries.first()
    }

    /// Distinct sources of the retrieved entries, in rank order
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for scored in &self.entries {
            if let Some(source) = scored.entry.metadata.get("source") {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, source: &str, score: f32) -> ScoredEntry {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), source.to_string());
        ScoredEntry {
            entry: IndexEntry {
                id: id.to_string(),
                vector: vec![1.0, 0.0],
                text: format!("text of {}", id),
                metadata,
            },
            score,
        }
    }

    #[test]
    fn test_source_metadata_includes_page() {
        let doc = Document::new("book#p3", "Fractures heal.", "Data/book.txt").with_page(3);
        let metadata = doc.source_metadata();

        assert_eq!(metadata.get("source"), Some(&"Data/book.txt".to_string()));
        assert_eq!(metadata.get("page"), Some(&"3".to_string()));
        assert_eq!(metadata.get("document_id"), Some(&"book#p3".to_string()));
    }

    #[test]
    fn test_source_metadata_without_page() {
        let doc = Document::new("notes", "Some text", "Data/notes.md");
        assert!(!doc.source_metadata().contains_key("page"));
    }

    #[test]
    fn test_chunk_entry_id_is_stable() {
        let chunk = Chunk {
            document_id: "Data/book.txt#p1".to_string(),
            sequence: 4,
            text: "segment".to_string(),
            overlap: 20,
            metadata: Metadata::new(),
        };
        assert_eq!(chunk.entry_id(), "Data/book.txt#p1#4");
        assert_eq!(chunk.entry_id(), chunk.clone().entry_id());
    }

    #[test]
    fn test_retrieval_result_sources_deduplicated() {
        let result = RetrievalResult::new(vec![
            scored("a", "Data/one.txt", 0.9),
            scored("b", "Data/two.txt", 0.8),
            scored("c", "Data/one.txt", 0.7),
        ]);

        assert_eq!(result.len(), 3);
        assert_eq!(result.top().unwrap().entry.id, "a");
        assert_eq!(result.sources(), vec!["Data/one.txt", "Data/two.txt"]);
    }

    #[test]
    fn test_empty_retrieval_result() {
        let result = RetrievalResult::default();
        assert!(result.is_empty());
        assert!(result.top().is_none());
        assert!(result.sources().is_empty());
    }
}
