//! Year-partitioned retrieval indices
//!
//! One `YearIndex` per fiscal year, built from that year's documents,
//! persisted under `storage_dir/<year>/index.json` and reloaded while its
//! source fingerprint still matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

pub mod chunker;
pub mod fingerprint;
pub mod store;
pub mod vector;

pub use chunker::Chunker;
pub use fingerprint::compute_fingerprint;
pub use store::IndexStore;

use vector::cosine_similarity;

pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: usize,
    pub file_name: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Searchable representation of one year's documents. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearIndex {
    pub format_version: u32,
    pub year: i32,
    pub built_at: DateTime<Utc>,
    pub source_fingerprint: String,
    pub backing_store_path: PathBuf,
    pub embedding_model: String,
    pub chunks: Vec<IndexedChunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: usize,
    pub file_name: String,
    pub text: String,
    pub score: f32,
}

impl YearIndex {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Top `top_k` chunks by cosine similarity. Ties keep chunk order.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(query_embedding, &chunk.embedding)))
            .filter(|(_, score)| score.is_finite())
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                RetrievedChunk {
                    chunk_id: chunk.chunk_id,
                    file_name: chunk.file_name.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect()
    }
}
