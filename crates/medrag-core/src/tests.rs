//! Snapshot tests for core configuration types

#[cfg(test)]
mod snapshot_tests {
    use crate::{ChunkingConfig, Document, IngestionConfig};
    use insta::assert_yaml_snapshot;

    #[test]
    fn test_chunking_config_snapshot() {
        assert_yaml_snapshot!(ChunkingConfig::default(), @r###"
        chunk_size: 500
        chunk_overlap: 20
        "###);
    }

    #[test]
    fn test_ingestion_config_snapshot() {
        assert_yaml_snapshot!(IngestionConfig::default(), @r###"
        chunking:
          chunk_size: 500
          chunk_overlap: 20
        batch_size: 32
        metric: cosine
        "###);
    }

    #[test]
    fn test_document_metadata_snapshot() {
        let doc = Document::new("Data/anatomy.txt#p2", "The femur is long.", "Data/anatomy.txt")
            .with_page(2);

        assert_yaml_snapshot!(doc.source_metadata(), @r###"
        document_id: "Data/anatomy.txt#p2"
        page: "2"
        source: Data/anatomy.txt
        "###);
    }
}
