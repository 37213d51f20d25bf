//! Prompt assembly for grounded question answering

use serde::Serialize;

use medrag_core::RetrievalResult;

pub const DEFAULT_INSTRUCTION: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, say that you don't know. \
Use three sentences maximum and keep the answer concise.";

/// Placed in the context slot when retrieval found nothing
pub const EMPTY_CONTEXT: &str = "No relevant context was found.";

/// A rendered-ready prompt: instruction, retrieved context and the question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub instruction: String,
    pub context: String,
    pub question: String,
}

impl Prompt {
    pub fn render(&self) -> String {
        let context = if self.context.is_empty() {
            EMPTY_CONTEXT
        } else {
            self.context.as_str()
        };
        format!(
            "{}\n\nContext:\n{}\n\nQuestion: {}\nAnswer:",
            self.instruction, context, self.question
        )
    }
}

/// Fixed instruction that tells the model to answer only from context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    instruction: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION)
    }
}

impl PromptTemplate {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Build a prompt from ranked retrieval results.
    ///
    /// Context keeps rank order and stops at `budget` chars; the entry that
    /// crosses the budget is truncated rather than dropped. The question is
    /// inserted exactly as given.
    pub fn assemble(&self, retrieval: &RetrievalResult, question: &str, budget: usize) -> Prompt {
        Prompt {
            instruction: self.instruction.clone(),
            context: build_context(retrieval, budget),
            question: question.to_string(),
        }
    }
}

const SEPARATOR: &str = "\n\n";

/// Join ranked entry texts with blank lines, capped at `budget` chars
pub fn build_context(retrieval: &RetrievalResult, budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for scored in retrieval.iter() {
        let text = scored.entry.text.trim();
        if text.is_empty() {
            continue;
        }

        let separator = if context.is_empty() { 0 } else { SEPARATOR.len() };
        let remaining = budget.saturating_sub(used + separator);
        if remaining == 0 {
            break;
        }

        if !context.is_empty() {
            context.push_str(SEPARATOR);
        }
        let taken: String = text.chars().take(remaining).collect();
        used += separator + taken.chars().count();
        context.push_str(&taken);
    }

    context
}
