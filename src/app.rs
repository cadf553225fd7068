//! Application wiring
//!
//! Builds the shared components once from `Settings` and exposes the two
//! entry points used by the binary: building every year's index, and
//! preparing the tool list for a chat session.

use crate::agent::DecompositionEngine;
use crate::backend::Backends;
use crate::config::Settings;
use crate::error::AgentError;
use crate::index::{Chunker, IndexStore, YearIndex};
use crate::loader::{DirectoryLoader, DocumentLoader};
use crate::session::HistoryConfig;
use crate::tools::{build_tools, QueryTool};
use crate::Result;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-year result of a load run.
#[derive(Debug)]
pub struct YearLoad {
    pub year: i32,
    pub result: Result<Arc<YearIndex>>,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub years: Vec<YearLoad>,
}

impl LoadReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &Arc<YearIndex>> {
        self.years.iter().filter_map(|y| y.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (i32, &AgentError)> {
        self.years
            .iter()
            .filter_map(|y| y.result.as_ref().err().map(|e| (y.year, e)))
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded().next().is_none()
    }
}

pub struct App {
    settings: Settings,
    backends: Backends,
    loader: Arc<dyn DocumentLoader>,
    store: IndexStore,
}

impl App {
    pub fn new(settings: Settings, backends: Backends, loader: Arc<dyn DocumentLoader>) -> Result<Self> {
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let store = IndexStore::new(
            settings.storage_dir.clone(),
            backends.embedder.clone(),
            chunker,
            settings.retry.clone(),
        );

        Ok(Self {
            settings,
            backends,
            loader,
            store,
        })
    }

    /// Backends chosen by API key presence, documents read from `data_dir`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let backends = Backends::from_settings(&settings)?;
        let loader = Arc::new(DirectoryLoader::new(settings.data_dir.clone()));
        Self::new(settings, backends, loader)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Build (or load from cache) every configured year concurrently.
    ///
    /// One year failing never affects the others.
    pub async fn load_data(&self, force_rebuild: bool) -> LoadReport {
        info!(years = ?self.settings.years, force_rebuild, "Loading data");

        let runs = self.settings.years.iter().map(|&year| async move {
            let result = self.index_year(year, force_rebuild).await;
            if let Err(e) = &result {
                warn!(year, error = %e, "Index build failed");
            }
            YearLoad { year, result }
        });

        LoadReport {
            years: join_all(runs).await,
        }
    }

    async fn index_year(&self, year: i32, force_rebuild: bool) -> Result<Arc<YearIndex>> {
        let documents = self
            .loader
            .load(year)
            .await
            .map_err(|e| AgentError::index_build(year, e.to_string()))?;

        if force_rebuild {
            self.store.rebuild(year, &documents).await
        } else {
            self.store.get_or_build(year, &documents).await
        }
    }

    /// Persisted indices for every configured year, building missing ones.
    ///
    /// Years that cannot be loaded or built are skipped with a warning; no
    /// usable year at all is a configuration error.
    pub async fn prepare_tools(&self) -> Result<Vec<QueryTool>> {
        let runs = self.settings.years.iter().map(|&year| async move {
            let index = match self.store.load_persisted(year).await {
                Ok(index) => Ok(index),
                Err(e) => {
                    info!(year, reason = %e, "No usable persisted index, building");
                    self.index_year(year, false).await
                }
            };
            (year, index)
        });

        let mut indices = BTreeMap::new();
        for (year, index) in join_all(runs).await {
            match index {
                Ok(index) => {
                    indices.insert(year, index);
                }
                Err(e) => warn!(year, error = %e, "Year unavailable for this session"),
            }
        }

        if indices.is_empty() {
            return Err(AgentError::ConfigurationError(format!(
                "No index could be loaded or built for years {:?}",
                self.settings.years
            )));
        }

        build_tools(&indices)
    }

    pub fn engine(&self) -> DecompositionEngine {
        DecompositionEngine::from_settings(&self.settings, self.backends.clone())
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            max_turns: self.settings.history_turns,
            ..HistoryConfig::default()
        }
    }
}
