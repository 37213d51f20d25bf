//! End-to-end and snapshot tests for the RAG pipeline

#[cfg(test)]
mod pipeline_tests {
    use async_trait::async_trait;
    use insta::assert_yaml_snapshot;
    use std::sync::Arc;

    use crate::{
        ChunkingConfig, Document, HashEmbedder, IngestionConfig, IngestionPipeline, LocalVectorIndex,
        PromptTemplate, RagChain, RetrievalConfig, VectorIndex,
    };
    use medrag_core::{
        EmbeddingService, GenerationConfig, GenerationResult, GenerationService, Result,
    };

    /// Echoes the top context line back as the answer
    struct EchoGenerator;

    #[async_trait]
    impl GenerationService for EchoGenerator {
        async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationResult> {
            let context = prompt
                .split("Context:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default();
            Ok(GenerationResult {
                text: context.to_string(),
                model_id: config.model_id.clone(),
                tokens_used: Some(context.split_whitespace().count() as u32),
            })
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(
                "diabetes.txt",
                "Diabetes is a metabolic disease characterized by high blood sugar.",
                "Data/diabetes.txt",
            ),
            Document::new(
                "fracture.txt",
                "A fracture is a broken bone. Treatment involves immobilization.",
                "Data/fracture.txt",
            ),
        ]
    }

    async fn ingested() -> (Arc<HashEmbedder>, Arc<LocalVectorIndex>) {
        let embedder = Arc::new(HashEmbedder::default());
        let index = Arc::new(LocalVectorIndex::in_memory());
        let pipeline =
            IngestionPipeline::new(embedder.clone(), index.clone(), IngestionConfig::default())
                .unwrap();

        let report = pipeline.ingest("medicalbot", &corpus()).await.unwrap();
        assert_eq!(report.chunks_written, 2);
        (embedder, index)
    }

    #[tokio::test]
    async fn test_question_retrieves_matching_document() {
        let (embedder, index) = ingested().await;

        let query = embedder.embed_one("What is diabetes?").await.unwrap();
        let top = index.query("medicalbot", &query, 1).await.unwrap();
        assert_eq!(top.entries[0].entry.id, "diabetes.txt#0");

        let query = embedder.embed_one("How is a fracture treated?").await.unwrap();
        let top = index.query("medicalbot", &query, 1).await.unwrap();
        assert_eq!(top.entries[0].entry.id, "fracture.txt#0");
    }

    #[tokio::test]
    async fn test_small_chunks_rank_matching_document_first() {
        let embedder = Arc::new(HashEmbedder::default());
        let index = Arc::new(LocalVectorIndex::in_memory());
        let config = IngestionConfig {
            chunking: ChunkingConfig::new(30, 5).unwrap(),
            ..Default::default()
        };
        let pipeline = IngestionPipeline::new(embedder.clone(), index.clone(), config).unwrap();
        pipeline.ingest("medicalbot", &corpus()).await.unwrap();

        let query = embedder.embed_one("What is diabetes?").await.unwrap();
        let ranked = index.query("medicalbot", &query, 10).await.unwrap();

        let top = ranked.top().unwrap();
        assert_eq!(top.entry.id, "diabetes.txt#0");
        assert_eq!(top.entry.text, "Diabetes is a metabolic ");

        let best_control = ranked
            .iter()
            .find(|s| s.entry.metadata.get("document_id").map(String::as_str) == Some("fracture.txt"))
            .unwrap();
        assert!(top.score > best_control.score);
    }

    #[tokio::test]
    async fn test_chain_answers_from_top_context() {
        let (embedder, index) = ingested().await;
        let chain = RagChain::new(embedder, index, Arc::new(EchoGenerator), "medicalbot")
            .with_retrieval(RetrievalConfig {
                top_k: 1,
                context_budget: 2000,
            })
            .unwrap()
            .with_template(PromptTemplate::new("Answer from context only."));

        let answer = chain.run("What is diabetes?").await.unwrap();

        assert_yaml_snapshot!(answer, @r###"
        text: Diabetes is a metabolic disease characterized by high blood sugar.
        sources:
          - Data/diabetes.txt
        model_id: echo
        "###);
    }

    #[tokio::test]
    async fn test_ingestion_report_snapshot() {
        let pipeline = IngestionPipeline::new(
            Arc::new(HashEmbedder::new(32).unwrap()),
            Arc::new(LocalVectorIndex::in_memory()),
            IngestionConfig::default(),
        )
        .unwrap();

        let report = pipeline.ingest("medicalbot", &corpus()).await.unwrap();
        assert_yaml_snapshot!(report, @r###"
        collection: medicalbot
        documents: 2
        chunks_written: 2
        "###);
    }

    #[test]
    fn test_prompt_snapshot() {
        let prompt = PromptTemplate::new("Answer from context only.").assemble(
            &Default::default(),
            "What is diabetes?",
            2000,
        );

        assert_yaml_snapshot!(prompt, @r###"
        instruction: Answer from context only.
        context: ""
        question: What is diabetes?
        "###);
    }
}
