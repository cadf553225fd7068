//! Shared fixtures for unit tests

use crate::backend::{EmbeddingBackend, HashEmbedder};
use crate::index::{IndexedChunk, YearIndex, INDEX_FORMAT_VERSION};
use crate::tools::QueryTool;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

/// In-memory index for `year` embedded with the offline embedder.
pub(crate) async fn index_for(year: i32, texts: &[&str]) -> Arc<YearIndex> {
    let embedder = HashEmbedder::default();
    let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let embeddings = embedder.embed(&owned).await.unwrap();

    Arc::new(YearIndex {
        format_version: INDEX_FORMAT_VERSION,
        year,
        built_at: Utc::now(),
        source_fingerprint: format!("fp-{}", year),
        backing_store_path: PathBuf::from(format!("storage/{}/index.json", year)),
        embedding_model: embedder.model_id().to_string(),
        chunks: owned
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| IndexedChunk {
                chunk_id: i,
                file_name: format!("UBER_{}.html", year),
                text,
                embedding,
            })
            .collect(),
    })
}

pub(crate) async fn tool_for(year: i32, texts: &[&str]) -> QueryTool {
    QueryTool::new(index_for(year, texts).await)
}
