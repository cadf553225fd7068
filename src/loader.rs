//! Document loading
//!
//! The core only needs `load(year)`; markup is not interpreted here.

use crate::error::AgentError;
use crate::models::Document;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Every returned document is tagged with `year`.
    async fn load(&self, year: i32) -> Result<Vec<Document>>;
}

/// Reads a year's filings from a data directory.
///
/// A file belongs to `year` when its stem ends in `_<year>` (`UBER_2019.html`)
/// or when it sits in a `<year>/` sub-directory. Files come back sorted by
/// name so fingerprints are stable.
pub struct DirectoryLoader {
    data_dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    async fn collect_files(&self, year: i32) -> Result<Vec<PathBuf>> {
        let suffix = format!("_{}", year);
        let mut files = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.data_dir).await.map_err(|e| {
            AgentError::LoaderError(format!("cannot read {}: {}", self.data_dir.display(), e))
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_file() && stem_matches(&path, &suffix) {
                files.push(path);
            }
        }

        let year_dir = self.data_dir.join(year.to_string());
        if tokio::fs::metadata(&year_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            let mut entries = tokio::fs::read_dir(&year_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn stem_matches(path: &Path, suffix: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with(suffix))
        .unwrap_or(false)
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self, year: i32) -> Result<Vec<Document>> {
        let files = self.collect_files(year).await?;
        let mut documents = Vec::with_capacity(files.len());

        for path in files {
            let bytes = tokio::fs::read(&path).await?;
            let file_name = path
                .strip_prefix(&self.data_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            debug!(year, file = %file_name, bytes = bytes.len(), "Loaded document");
            documents.push(Document::new(
                year,
                file_name,
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }

        info!(year, documents = documents.len(), "Documents loaded");
        Ok(documents)
    }
}
