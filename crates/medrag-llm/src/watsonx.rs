//! WatsonX AI generation client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use medrag_core::{Error, GenerationConfig, GenerationResult, GenerationService, Result};

use crate::config::WatsonxConfig;

/// Tokens this close to expiry are refreshed before use
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;
/// IAM tokens live an hour unless the response says otherwise
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// An IAM access token and the moment it stops being valid
#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub(crate) fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Expired, or about to be
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

/// WatsonX AI client.
///
/// The IAM token is fetched on first use (or by [`WatsonxClient::connect`])
/// and refreshed shortly before it expires or when the API answers 401.
pub struct WatsonxClient {
    config: WatsonxConfig,
    token: RwLock<Option<AccessToken>>,
    client: Client,
    current_model: String,
}

#[derive(Serialize)]
struct TokenRequest {
    grant_type: String,
    apikey: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: i64,
}

fn default_token_lifetime() -> i64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

#[derive(Serialize)]
struct GenerationParams {
    decoding_method: String,
    max_new_tokens: u32,
    min_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    repetition_penalty: f32,
    stop_sequences: Vec<String>,
}

#[derive(Serialize)]
struct GenerationRequest {
    input: String,
    parameters: GenerationParams,
    model_id: String,
    project_id: String,
}

#[derive(Deserialize)]
struct GenerationResults {
    generated_text: String,
    #[serde(default)]
    generated_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct GenerationData {
    results: Vec<GenerationResults>,
}

/// Text and token count accumulated from a streamed response
#[derive(Debug, Default, PartialEq)]
pub(crate) struct StreamedAnswer {
    pub text: String,
    pub tokens: Option<u32>,
}

impl WatsonxClient {
    /// Model constants
    pub const GRANITE_4_H_SMALL: &'static str = "ibm/granite-4-h-small";
    pub const GRANITE_3_3_8B_INSTRUCT: &'static str = "ibm/granite-3-3-8b-instruct";

    /// Create a new WatsonX client from configuration
    pub fn new(config: WatsonxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::GenerationFailure(e.to_string()))?;

        Ok(Self {
            config,
            token: RwLock::new(None),
            client,
            current_model: Self::GRANITE_4_H_SMALL.to_string(),
        })
    }

    /// Create a new WatsonX client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = WatsonxConfig::from_env()?;
        Self::new(config)
    }

    /// Set the model to use for generation
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.current_model = model_id.into();
        self
    }

    /// Exchange the API key for an IAM access token now, so bad
    /// credentials surface at start-up rather than on the first question.
    pub async fn connect(&self) -> Result<()> {
        let token = self.fetch_token().await?;
        self.store_token(token).await;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub(crate) async fn store_token(&self, token: AccessToken) {
        *self.token.write().await = Some(token);
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// A usable access token, refreshing the cached one when it is stale
    async fn access_token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.needs_refresh(Utc::now()) {
                    return Ok(token.value.clone());
                }
            }
        }

        debug!("refreshing WatsonX access token");
        let token = self.fetch_token().await?;
        let value = token.value.clone();
        self.store_token(token).await;
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let token_request = TokenRequest {
            grant_type: "urn:ibm:params:oauth:grant-type:apikey".to_string(),
            apikey: self.config.api_key.clone(),
        };

        let url = format!("https://{}/identity/token", self.config.iam_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&token_request)
            .send()
            .await
            .map_err(|e| Error::GenerationFailure(format!("IAM request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::GenerationFailure(format!(
                "Authentication failed: {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::GenerationFailure(format!("Malformed IAM response: {}", e)))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(token_response.expires_in);
        debug!(iam_url = %self.config.iam_url, %expires_at, "obtained WatsonX access token");

        Ok(AccessToken::new(token_response.access_token, expires_at))
    }

    fn build_params(config: &GenerationConfig) -> GenerationParams {
        // Non-positive temperature means deterministic decoding
        let (decoding_method, temperature) = if config.temperature > 0.0 {
            ("sample", Some(config.temperature))
        } else {
            ("greedy", None)
        };

        GenerationParams {
            decoding_method: decoding_method.to_string(),
            max_new_tokens: config.max_tokens,
            min_new_tokens: 1,
            temperature,
            repetition_penalty: 1.1,
            stop_sequences: config.stop_sequences.clone(),
        }
    }

    async fn send_generation(
        &self,
        url: &str,
        access_token: &str,
        request_body: &GenerationRequest,
    ) -> Result<Response> {
        self.client
            .post(url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .bearer_auth(access_token)
            .json(request_body)
            .send()
            .await
            .map_err(|e| Error::GenerationFailure(format!("WatsonX request failed: {}", e)))
    }

    /// Perform the actual generation request
    async fn perform_generation(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<StreamedAnswer> {
        let request_body = GenerationRequest {
            input: prompt.to_string(),
            parameters: Self::build_params(config),
            model_id: config.model_id.clone(),
            project_id: self.config.project_id.clone(),
        };

        let url = format!(
            "{}/ml/v1/text/generation_stream?version=2023-05-29",
            self.config.api_url
        );

        let access_token = self.access_token().await?;
        let mut response = self
            .send_generation(&url, &access_token, &request_body)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("WatsonX rejected the access token, refreshing");
            self.invalidate_token().await;
            let access_token = self.access_token().await?;
            response = self
                .send_generation(&url, &access_token, &request_body)
                .await?;
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::GenerationFailure(format!(
                "WatsonX API request failed with status {}: {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| Error::GenerationFailure(format!("WatsonX body unreadable: {}", e)))?;

        parse_generation_stream(&response_text)
    }
}

/// Parse the Server-Sent Events body of `generation_stream`.
///
/// Fails with `GenerationFailure` when no text could be recovered.
pub(crate) fn parse_generation_stream(body: &str) -> Result<StreamedAnswer> {
    let mut answer = StreamedAnswer::default();

    for line in body.lines() {
        let Some(json_data) = line.strip_prefix("data:") else {
            continue;
        };
        let json_data = json_data.trim();

        if json_data.is_empty() || json_data == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<GenerationData>(json_data) {
            Ok(data) => {
                if let Some(result) = data.results.first() {
                    answer.text.push_str(&result.generated_text);
                    if let Some(count) = result.generated_token_count {
                        answer.tokens = Some(count);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping unparseable WatsonX stream line");
            }
        }
    }

    let mut cleaned = answer.text.trim();
    if let Some(stripped) = cleaned.strip_prefix("Answer:") {
        cleaned = stripped.trim();
    }
    if let Some(question_pos) = cleaned.find("Question:") {
        cleaned = cleaned[..question_pos].trim();
    }

    if cleaned.is_empty() {
        return Err(Error::GenerationFailure(
            "Empty response from WatsonX API".to_string(),
        ));
    }

    Ok(StreamedAnswer {
        text: cleaned.to_string(),
        tokens: answer.tokens,
    })
}

#[async_trait]
impl GenerationService for WatsonxClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationResult> {
        let answer = self.perform_generation(prompt, config).await?;

        Ok(GenerationResult {
            text: answer.text,
            model_id: config.model_id.clone(),
            tokens_used: answer.tokens,
        })
    }

    fn model_id(&self) -> &str {
        &self.current_model
    }
}
