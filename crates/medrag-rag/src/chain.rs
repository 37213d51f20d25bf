//! Query-time RAG chain: embed, retrieve, assemble, generate

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use medrag_core::{
    check_embedding_model, EmbeddingService, Error, GenerationConfig, GenerationService, Result,
    RetrievalConfig, RetrievalResult, VectorIndex,
};

use crate::prompt::PromptTemplate;

pub const DEFAULT_FALLBACK: &str =
    "I'm sorry, I couldn't produce an answer right now. Please try again later.";

/// Stage a question is in while the chain runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    EmbeddingQuery,
    Retrieving,
    AssemblingPrompt,
    Generating,
    Done,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainState::EmbeddingQuery => "embedding_query",
            ChainState::Retrieving => "retrieving",
            ChainState::AssemblingPrompt => "assembling_prompt",
            ChainState::Generating => "generating",
            ChainState::Done => "done",
        };
        f.write_str(name)
    }
}

/// An error tagged with the stage it happened in
#[derive(Debug)]
pub struct ChainFailure {
    pub state: ChainState,
    pub error: Error,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed while {}: {}", self.state, self.error)
    }
}

impl std::error::Error for ChainFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A grounded answer and where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Distinct sources of the retrieved context, in rank order
    pub sources: Vec<String>,
    pub model_id: String,
}

/// Answers questions from an indexed collection.
///
/// Holds shared handles only, so one chain serves concurrent questions.
/// Before its first query the chain checks that the collection was built
/// with the same embedding dimension and model as its embedder.
pub struct RagChain {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationService>,
    collection: String,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
    template: PromptTemplate,
    fallback: String,
    verified: OnceCell<()>,
}

impl RagChain {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationService>,
        collection: impl Into<String>,
    ) -> Self {
        let generation = GenerationConfig::default().with_model(generator.model_id());
        Self {
            embedder,
            index,
            generator,
            collection: collection.into(),
            retrieval: RetrievalConfig::default(),
            generation,
            template: PromptTemplate::default(),
            fallback: DEFAULT_FALLBACK.to_string(),
            verified: OnceCell::new(),
        }
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Result<Self> {
        retrieval.validate()?;
        self.retrieval = retrieval;
        Ok(self)
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_fallback_message(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback
    }

    /// Check the collection against the embedder.
    ///
    /// Fails with `IndexUnavailable` when the collection is missing,
    /// `DimensionMismatch` or `ModelMismatch` when it was built with another
    /// embedding model. Success is remembered for the life of the chain.
    pub async fn verify_collection(&self) -> Result<()> {
        self.verified
            .get_or_try_init(|| async {
                let info = self
                    .index
                    .collection_info(&self.collection)
                    .await?
                    .ok_or_else(|| {
                        Error::IndexUnavailable(format!(
                            "collection '{}' does not exist",
                            self.collection
                        ))
                    })?;

                if info.dimension != self.embedder.dimension() {
                    return Err(Error::DimensionMismatch {
                        expected: info.dimension,
                        actual: self.embedder.dimension(),
                    });
                }
                check_embedding_model(info.embedding_model.as_deref(), self.embedder.model_id())?;

                debug!(collection = %self.collection, model = self.embedder.model_id(), "collection verified");
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }

    /// Retrieve the top-k entries for a question without generating
    pub async fn retrieve(&self, question: &str) -> std::result::Result<RetrievalResult, ChainFailure> {
        self.verify_collection()
            .await
            .map_err(|error| ChainFailure {
                state: ChainState::Retrieving,
                error,
            })?;

        debug!(state = %ChainState::EmbeddingQuery, "chain transition");
        let vector = self
            .embedder
            .embed_one(question)
            .await
            .map_err(|error| ChainFailure {
                state: ChainState::EmbeddingQuery,
                error,
            })?;

        debug!(state = %ChainState::Retrieving, "chain transition");
        self.index
            .query(&self.collection, &vector, self.retrieval.top_k)
            .await
            .map_err(|error| ChainFailure {
                state: ChainState::Retrieving,
                error,
            })
    }

    /// Run the full chain, reporting the failing stage on error
    pub async fn run(&self, question: &str) -> std::result::Result<Answer, ChainFailure> {
        let retrieval = self.retrieve(question).await?;
        debug!(retrieved = retrieval.len(), "retrieval complete");

        debug!(state = %ChainState::AssemblingPrompt, "chain transition");
        let prompt = self
            .template
            .assemble(&retrieval, question, self.retrieval.context_budget)
            .render();

        debug!(state = %ChainState::Generating, prompt_chars = prompt.chars().count(), "chain transition");
        let generated = self
            .generator
            .generate(&prompt, &self.generation)
            .await
            .map_err(|error| ChainFailure {
                state: ChainState::Generating,
                error,
            })?;

        let text = generated.text.trim();
        if text.is_empty() {
            return Err(ChainFailure {
                state: ChainState::Generating,
                error: Error::GenerationFailure("model returned an empty answer".to_string()),
            });
        }

        debug!(state = %ChainState::Done, "chain transition");
        Ok(Answer {
            text: text.to_string(),
            sources: retrieval.sources(),
            model_id: generated.model_id,
        })
    }

    /// Answer a question, substituting the fallback message on any failure.
    ///
    /// The failure is logged with its stage and kind; the underlying detail
    /// never reaches the caller.
    pub async fn answer(&self, question: &str) -> String {
        match self.run(question).await {
            Ok(answer) => {
                info!(sources = answer.sources.len(), model = %answer.model_id, "answered question");
                answer.text
            }
            Err(failure) => {
                error!(
                    state = %failure.state,
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "question failed, returning fallback"
                );
                self.fallback.clone()
            }
        }
    }
}
