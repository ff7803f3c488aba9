// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Hosted VLM client used to second-guess detector output

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use super::image_utils::{detect_format, format_to_mime, MAX_IMAGE_SIZE};
use crate::config::{require_credential, ConfigError, GOOGLE_API_KEY_VAR};

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read image: {0}")]
    Image(String),

    #[error("Verifier request failed: {0}")]
    Transport(String),

    #[error("Verifier returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected verifier response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for VerifierError {
    fn from(e: reqwest::Error) -> Self {
        VerifierError::Transport(e.to_string())
    }
}

/// Multimodal service that reviews an image against a text prompt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Fail fast when the service cannot be called at all (missing key)
    fn preflight(&self) -> Result<(), VerifierError>;

    /// Model the verifier talks to, for reporting
    fn model_name(&self) -> &str;

    /// Whether the service currently answers
    async fn health_check(&self) -> bool;

    /// Send the image and prompt, returning the raw text reply
    async fn verify(&self, image_path: &Path, prompt: &str) -> Result<String, VerifierError>;
}

/// Connection settings for the Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_var: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key_var: GOOGLE_API_KEY_VAR.to_string(),
        }
    }
}

// --- generateContent serde structs ---

#[derive(Debug, serde::Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, serde::Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Debug, serde::Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(serde::Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        Some(text)
    }
}

/// Client for the Gemini `generateContent` endpoint
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(mut config: GeminiConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        config.endpoint = config.endpoint.trim_end_matches('/').to_string();
        info!(
            "Gemini client configured: endpoint={}, model={}",
            config.endpoint, config.model
        );

        Ok(Self { client, config })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint, self.config.model
        )
    }
}

fn build_request(prompt: &str, image: &[u8]) -> Result<GenerateRequest, VerifierError> {
    let format = detect_format(image).map_err(|e| VerifierError::Image(e.to_string()))?;

    Ok(GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part::Text {
                    text: prompt.to_string(),
                },
                Part::Image {
                    inline_data: InlineData {
                        mime_type: format_to_mime(format).to_string(),
                        data: STANDARD.encode(image),
                    },
                },
            ],
        }],
    })
}

#[async_trait]
impl Verifier for GeminiClient {
    fn preflight(&self) -> Result<(), VerifierError> {
        require_credential(&self.config.api_key_var)?;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Asks the model listing for the configured model
    async fn health_check(&self) -> bool {
        let Ok(key) = require_credential(&self.config.api_key_var) else {
            return false;
        };
        let url = format!(
            "{}/v1beta/models/{}",
            self.config.endpoint, self.config.model
        );
        match self
            .client
            .get(url)
            .header("x-goog-api-key", key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Gemini health check failed: {}", e);
                false
            }
        }
    }

    async fn verify(&self, image_path: &Path, prompt: &str) -> Result<String, VerifierError> {
        let api_key = require_credential(&self.config.api_key_var)?;
        let start = Instant::now();

        let image = tokio::fs::read(image_path)
            .await
            .map_err(|e| VerifierError::Image(format!("{}: {}", image_path.display(), e)))?;
        if image.len() > MAX_IMAGE_SIZE {
            return Err(VerifierError::Image(format!(
                "{} is larger than {} bytes",
                image_path.display(),
                MAX_IMAGE_SIZE
            )));
        }
        let request = build_request(prompt, &image)?;

        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifierError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| VerifierError::InvalidResponse(e.to_string()))?;
        let text = parsed
            .text()
            .ok_or_else(|| VerifierError::InvalidResponse("no candidates returned".to_string()))?;

        info!(
            "Gemini replied in {}ms ({} chars)",
            start.elapsed().as_millis(),
            text.len()
        );
        debug!("Gemini raw reply: {}", text);

        Ok(text)
    }
}
