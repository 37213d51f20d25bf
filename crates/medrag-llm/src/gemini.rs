//! Google Gemini generation client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use medrag_core::{Error, GenerationConfig, GenerationResult, GenerationService, Result};

use crate::config::GeminiConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `generateContent` client.
///
/// The API key travels in the `x-goog-api-key` header, never in the URL.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

impl GeminiClient {
    /// Create a new Gemini client from configuration
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "Gemini API key must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::GenerationFailure(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Create a new Gemini client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.config.api_url, model)
    }
}

fn build_request<'a>(prompt: &'a str, config: &GenerationConfig) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![Part { text: prompt }],
        }],
        generation_config: GeminiGenerationConfig {
            max_output_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: config.stop_sequences.clone(),
        },
    }
}

/// Extract the first candidate's text from a `generateContent` body.
fn parse_response(body: &str) -> Result<(String, Option<u32>)> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| Error::GenerationFailure(format!("Malformed Gemini response: {}", e)))?;

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| Error::GenerationFailure("Gemini returned no candidates".to_string()))?;

    let text: String = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::GenerationFailure(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let tokens = response
        .usage_metadata
        .and_then(|usage| usage.candidates_token_count);

    Ok((text, tokens))
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationResult> {
        let url = self.endpoint_url(&config.model_id);
        debug!(model = %config.model_id, prompt_len = prompt.len(), "sending Gemini request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&build_request(prompt, config))
            .send()
            .await
            .map_err(|e| {
                Error::GenerationFailure(format!("Gemini request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::GenerationFailure(format!("Gemini body unreadable: {}", e.without_url()))
        })?;

        if !status.is_success() {
            return Err(Error::GenerationFailure(format!(
                "Gemini API request failed with status {}: {}",
                status, body
            )));
        }

        let (text, tokens_used) = parse_response(&body)?;

        Ok(GenerationResult {
            text,
            model_id: config.model_id.clone(),
            tokens_used,
        })
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
