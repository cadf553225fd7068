//! Offline backends
//!
//! Deterministic stand-ins for the Gemini client. They keep the whole
//! pipeline usable without an API key and make tests reproducible.

use crate::backend::{extract_context_block, EmbeddingBackend, GenerationBackend};
use crate::index::vector::l2_normalize;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Hashed bag-of-words embeddings.
///
/// Every lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a sign taken from the hash, then the vector is
/// L2-normalized. Texts sharing vocabulary end up close together.
pub struct HashEmbedder {
    dims: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model_id: format!("offline-hash-{}", dims.max(1)),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for token in tokenize(text) {
            let hash = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize % self.dims;
            let sign = if hash[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Answers with the prompt's context block verbatim.
///
/// Without a context block the last non-empty prompt line is echoed.
pub struct ExtractiveGenerator;

#[async_trait]
impl GenerationBackend for ExtractiveGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Some(context) = extract_context_block(prompt) {
            return Ok(context.to_string());
        }

        Ok(prompt
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string())
    }
}

/// Lowercase alphanumeric tokens (digits kept, so years and figures count).
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
