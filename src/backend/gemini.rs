//! Gemini API client
//!
//! One long-lived reqwest::Client serves both generation
//! (`generateContent`) and embeddings (`batchEmbedContents`).

use crate::backend::{EmbeddingBackend, GenerationBackend};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The API caps batch embedding requests at 100 inputs.
const MAX_EMBED_BATCH: usize = 100;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    generation_model: String,
    embedding_model: String,
    system_prompt: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        generation_model: String,
        embedding_model: String,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AgentError::ConfigurationError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            generation_model,
            embedding_model,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}?key={}", BASE_URL, model, method, self.api_key)
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self.client.post(url).json(body).send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            AgentError::BackendError(format!("Gemini API request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(classify_status(status, &error_text));
        }

        response.json::<R>().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::BackendError(format!("Gemini parse error: {}", e))
        })
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content::text(prompt)],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: Content::text(&self.system_prompt),
        };

        debug!(model = %self.generation_model, "Calling Gemini generateContent");

        let url = self.endpoint(&self.generation_model, "generateContent");
        let response: GenerateResponse = self.post(&url, &request).await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::BackendError("No candidates from Gemini".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AgentError::BackendError(format!(
                "Empty response from Gemini (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(text)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiClient {
    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint(&self.embedding_model, "batchEmbedContents");
        let model_path = format!("models/{}", self.embedding_model);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_EMBED_BATCH) {
            let request = EmbedBatchRequest {
                requests: batch
                    .iter()
                    .map(|text| EmbedRequest {
                        model: model_path.clone(),
                        content: Content::text(text),
                    })
                    .collect(),
            };

            debug!(batch_size = batch.len(), "Calling Gemini batchEmbedContents");

            let response: EmbedBatchResponse = self.post(&url, &request).await?;
            if response.embeddings.len() != batch.len() {
                return Err(AgentError::BackendError(format!(
                    "Gemini returned {} embeddings for {} inputs",
                    response.embeddings.len(),
                    batch.len()
                )));
            }
            vectors.extend(response.embeddings.into_iter().map(|e| e.values));
        }

        Ok(vectors)
    }
}

/// Authentication failures are setup problems; everything else is retryable.
fn classify_status(status: StatusCode, body: &str) -> AgentError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::ConfigurationError(
            format!("Gemini rejected the API key ({}): {}", status, body),
        ),
        _ if body.contains("API_KEY_INVALID") => {
            AgentError::ConfigurationError(format!("Gemini rejected the API key: {}", body))
        }
        _ => AgentError::BackendError(format!("Gemini API error {}: {}", status, body)),
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a financial analyst answering questions about a company's annual reports.

Guidelines:
- Answer only from the provided context
- Quote figures exactly as they appear, with units and fiscal year
- Say plainly when the context does not contain the answer
- Be structured and concise"#;

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedBatchRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedBatchResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}
