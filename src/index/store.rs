//! Persisted per-year index store
//!
//! Owns the cache policy: load when the recorded fingerprint matches the
//! documents, rebuild otherwise. Builds for one year are serialized by a
//! per-year lock; different years build concurrently. Writes go to a temp
//! file in the target directory and are renamed into place.

use crate::backend::{with_retry, EmbeddingBackend};
use crate::config::RetryPolicy;
use crate::error::AgentError;
use crate::index::{compute_fingerprint, Chunker, IndexedChunk, YearIndex, INDEX_FORMAT_VERSION};
use crate::models::Document;
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

const INDEX_FILE_NAME: &str = "index.json";
const EMBED_BATCH_SIZE: usize = 64;

pub struct IndexStore {
    storage_dir: PathBuf,
    embedder: Arc<dyn EmbeddingBackend>,
    chunker: Chunker,
    retry: RetryPolicy,
    build_locks: Mutex<HashMap<i32, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingBackend>,
        chunker: Chunker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            embedder,
            chunker,
            retry,
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic location of a year's persisted index.
    pub fn index_path(&self, year: i32) -> PathBuf {
        self.storage_dir.join(year.to_string()).join(INDEX_FILE_NAME)
    }

    /// Load a valid cached index for `year`, or build and persist a new one.
    pub async fn get_or_build(&self, year: i32, documents: &[Document]) -> Result<Arc<YearIndex>> {
        let lock = self.year_lock(year);
        let _guard = lock.lock().await;

        validate_documents(year, documents)?;

        let fingerprint = self.fingerprint(year, documents)?;
        let path = self.index_path(year);

        match read_index(&path).await {
            Ok(Some(index))
                if !index.source_fingerprint.is_empty()
                    && index.source_fingerprint == fingerprint
                    && index.year == year =>
            {
                info!(year, chunks = index.chunk_count(), "Loaded cached index");
                return Ok(Arc::new(index));
            }
            Ok(Some(_)) => {
                info!(year, "Cached index is stale, rebuilding");
            }
            Ok(None) => {
                debug!(year, "No cached index");
            }
            Err(e) => {
                warn!(year, error = %e, "Cached index unreadable, rebuilding");
            }
        }

        self.build_and_persist(year, documents, fingerprint, path).await
    }

    /// Build and persist regardless of any cached index.
    pub async fn rebuild(&self, year: i32, documents: &[Document]) -> Result<Arc<YearIndex>> {
        let lock = self.year_lock(year);
        let _guard = lock.lock().await;

        validate_documents(year, documents)?;

        let fingerprint = self.fingerprint(year, documents)?;
        let path = self.index_path(year);
        self.build_and_persist(year, documents, fingerprint, path).await
    }

    /// Load a persisted index without checking it against documents.
    pub async fn load_persisted(&self, year: i32) -> Result<Arc<YearIndex>> {
        let lock = self.year_lock(year);
        let _guard = lock.lock().await;

        let path = self.index_path(year);
        match read_index(&path).await {
            Ok(Some(index)) if index.year == year => {
                if index.embedding_model != self.embedder.model_id() {
                    return Err(AgentError::index_build(
                        year,
                        format!(
                            "index was embedded with '{}' but the active model is '{}'",
                            index.embedding_model,
                            self.embedder.model_id()
                        ),
                    ));
                }
                Ok(Arc::new(index))
            }
            Ok(Some(index)) => Err(AgentError::index_build(
                year,
                format!("{} holds the index for {}", path.display(), index.year),
            )),
            Ok(None) => Err(AgentError::index_build(
                year,
                format!("no persisted index at {}", path.display()),
            )),
            Err(e) => Err(AgentError::index_build(year, e.to_string())),
        }
    }

    fn fingerprint(&self, year: i32, documents: &[Document]) -> Result<String> {
        compute_fingerprint(documents, &self.chunker, self.embedder.model_id())
            .map_err(|e| AgentError::index_build(year, format!("cannot fingerprint documents: {}", e)))
    }

    fn year_lock(&self, year: i32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .build_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(year)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn build_and_persist(
        &self,
        year: i32,
        documents: &[Document],
        fingerprint: String,
        path: PathBuf,
    ) -> Result<Arc<YearIndex>> {
        let start = Instant::now();

        let mut pending: Vec<(String, String)> = Vec::new();
        for doc in documents {
            for text in self.chunker.chunk(&doc.content) {
                pending.push((doc.metadata.file_name.clone(), text));
            }
        }

        if pending.is_empty() {
            return Err(AgentError::index_build(year, "documents contain no text"));
        }

        let mut chunks = Vec::with_capacity(pending.len());
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = with_retry(&self.retry, "embed_chunks", || self.embedder.embed(&texts))
                .await
                .map_err(|e| AgentError::index_build(year, format!("embedding failed: {}", e)))?;

            if embeddings.len() != texts.len() {
                return Err(AgentError::index_build(
                    year,
                    format!("expected {} embeddings, got {}", texts.len(), embeddings.len()),
                ));
            }

            for ((file_name, text), embedding) in batch.iter().zip(embeddings) {
                chunks.push(IndexedChunk {
                    chunk_id: chunks.len(),
                    file_name: file_name.clone(),
                    text: text.clone(),
                    embedding,
                });
            }
        }

        let index = YearIndex {
            format_version: INDEX_FORMAT_VERSION,
            year,
            built_at: Utc::now(),
            source_fingerprint: fingerprint,
            backing_store_path: path.clone(),
            embedding_model: self.embedder.model_id().to_string(),
            chunks,
        };

        let index = Arc::new(index);
        persist_index(index.clone(), path).await?;

        info!(
            year,
            chunks = index.chunk_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built and persisted index"
        );

        Ok(index)
    }
}

fn validate_documents(year: i32, documents: &[Document]) -> Result<()> {
    if documents.is_empty() {
        return Err(AgentError::index_build(year, "no documents supplied"));
    }

    if let Some(stray) = documents.iter().find(|d| d.year() != year) {
        return Err(AgentError::index_build(
            year,
            format!(
                "document '{}' is tagged with year {}",
                stray.metadata.file_name,
                stray.year()
            ),
        ));
    }

    Ok(())
}

/// `Ok(None)` when nothing is persisted yet.
async fn read_index(path: &Path) -> Result<Option<YearIndex>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut index: YearIndex = serde_json::from_slice(&bytes)?;
    if index.format_version != INDEX_FORMAT_VERSION {
        return Err(AgentError::index_build(
            index.year,
            format!(
                "unsupported index format {} in {}",
                index.format_version,
                path.display()
            ),
        ));
    }
    index.backing_store_path = path.to_path_buf();
    Ok(Some(index))
}

async fn persist_index(index: Arc<YearIndex>, path: PathBuf) -> Result<()> {
    let year = index.year;

    tokio::task::spawn_blocking(move || write_atomically(&index, &path))
        .await
        .map_err(|e| AgentError::index_build(year, format!("persist task failed: {}", e)))?
        .map_err(|e| AgentError::index_build(year, format!("persist failed: {}", e)))
}

fn write_atomically(index: &YearIndex, path: &Path) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        AgentError::ConfigurationError(format!("index path {} has no parent", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, index)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| AgentError::IoError(e.error))?;

    Ok(())
}
