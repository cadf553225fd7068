//! Embedding and generation backends
//!
//! The index store and the decomposition engine only see these two traits.
//! Concrete clients are constructed once at startup and shared by `Arc`.

use crate::config::{RetryPolicy, Settings};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod gemini;
pub mod offline;

pub use gemini::GeminiClient;
pub use offline::{ExtractiveGenerator, HashEmbedder};

/// Opening marker of the retrieved-context block inside a prompt.
pub const CONTEXT_OPEN: &str = "<context>";
/// Closing marker of the retrieved-context block inside a prompt.
pub const CONTEXT_CLOSE: &str = "</context>";

/// Text → vector.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Stable identifier of the embedding model (part of index fingerprints).
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::AgentError::BackendError("Embedding backend returned no vector".to_string())
        })
    }
}

/// Prompt → text.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The pair of backends shared by every component.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub generator: Arc<dyn GenerationBackend>,
}

impl Backends {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, generator: Arc<dyn GenerationBackend>) -> Self {
        Self { embedder, generator }
    }

    /// Deterministic local backends, no network access.
    pub fn offline() -> Self {
        Self {
            embedder: Arc::new(HashEmbedder::default()),
            generator: Arc::new(ExtractiveGenerator),
        }
    }

    /// Gemini when an API key is configured, offline backends otherwise.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.api_key.as_deref() {
            Some(key) => {
                let client = Arc::new(GeminiClient::new(
                    key.to_string(),
                    settings.generation_model.clone(),
                    settings.embedding_model.clone(),
                    settings.load_system_prompt(),
                )?);
                info!(model = %settings.generation_model, "Using Gemini backends");
                Ok(Self {
                    embedder: client.clone(),
                    generator: client,
                })
            }
            None => {
                info!("Using offline backends");
                Ok(Self::offline())
            }
        }
    }
}

/// Run `operation` and retry transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries_used = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries_used < policy.max_retries => {
                let delay = retry_backoff(policy, retries_used);
                warn!(
                    operation = label,
                    attempt = retries_used + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                retries_used += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn retry_backoff(policy: &RetryPolicy, retries_used: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis();
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let max_ms = policy.max_delay.as_millis().max(base_ms);
    let multiplier = 1u128 << retries_used.min(20);
    let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
    Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
}

/// Text between the context markers of a prompt, if any.
pub fn extract_context_block(prompt: &str) -> Option<&str> {
    let start = prompt.find(CONTEXT_OPEN)? + CONTEXT_OPEN.len();
    let end = prompt[start..].find(CONTEXT_CLOSE)? + start;
    Some(prompt[start..end].trim())
}
