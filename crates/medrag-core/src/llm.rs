//! Generation service trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Configuration for text generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model_id: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Lower values bias toward the most probable continuation
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_id: "gemini-1.5-flash".to_string(),
            max_tokens: 500,
            temperature: 0.4,
            stop_sequences: vec!["Question:".to_string()],
        }
    }
}

impl GenerationConfig {
    /// Use a different model with the same sampling settings
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }
}

/// Result of a text generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model_id: String,
    pub tokens_used: Option<u32>,
}

/// Trait for generation services (e.g., Gemini, WatsonX)
///
/// Implementations may be unreachable, rate-limited, or return malformed
/// output; all of these surface as [`crate::Error::GenerationFailure`].
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate a completion for an assembled prompt
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationResult>;

    /// Get the model ID being used
    fn model_id(&self) -> &str;
}
