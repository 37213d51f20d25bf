//! Generation backend configuration

use medrag_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_IAM_URL: &str = "iam.cloud.ibm.com";
const DEFAULT_WATSONX_URL: &str = "https://us-south.ml.cloud.ibm.com";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for WatsonX AI client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatsonxConfig {
    pub api_key: String,
    pub project_id: String,
    pub iam_url: String,
    pub api_url: String,
}

impl WatsonxConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("WATSONX_API_KEY")
            .or_else(|_| env::var("API_KEY"))
            .map_err(|_| {
                Error::InvalidConfig(
                    "WATSONX_API_KEY or API_KEY environment variable not found".to_string(),
                )
            })?;

        let project_id = env::var("WATSONX_PROJECT_ID")
            .or_else(|_| env::var("PROJECT_ID"))
            .map_err(|_| {
                Error::InvalidConfig(
                    "WATSONX_PROJECT_ID or PROJECT_ID environment variable not found".to_string(),
                )
            })?;

        let iam_url = env::var("IAM_IBM_CLOUD_URL").unwrap_or_else(|_| DEFAULT_IAM_URL.to_string());

        let api_url =
            env::var("WATSONX_API_URL").unwrap_or_else(|_| DEFAULT_WATSONX_URL.to_string());

        Ok(Self {
            api_key,
            project_id,
            iam_url,
            api_url,
        })
    }

    /// Create configuration with explicit values
    pub fn new(api_key: String, project_id: String) -> Self {
        Self {
            api_key,
            project_id,
            iam_url: DEFAULT_IAM_URL.to_string(),
            api_url: DEFAULT_WATSONX_URL.to_string(),
        }
    }
}

/// Configuration for the Google Gemini client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
}

impl GeminiConfig {
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("GOOGLE_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                Error::InvalidConfig(
                    "GOOGLE_API_KEY or GEMINI_API_KEY environment variable not found".to_string(),
                )
            })?;

        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        let api_url = env::var("GEMINI_API_URL").unwrap_or_else(|_| DEFAULT_GEMINI_URL.to_string());

        Ok(Self {
            api_key,
            model,
            api_url,
        })
    }

    /// Create configuration with explicit values
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: Self::DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_GEMINI_URL.to_string(),
        }
    }

    /// Override the API base URL
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}
