//! Runtime settings
//!
//! Loaded from the environment (and `.env` when present) once at startup,
//! then passed down explicitly.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_YEARS: &[i32] = &[2019, 2020, 2021, 2022];
pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerKind {
    Rules,
    Llm,
}

impl FromStr for PlannerKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rules" | "rule" => Ok(PlannerKind::Rules),
            "llm" => Ok(PlannerKind::Llm),
            other => Err(AgentError::ConfigurationError(format!(
                "Unknown planner '{}', expected 'rules' or 'llm'",
                other
            ))),
        }
    }
}

/// Bounded exponential backoff for backend calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; used by tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub years: Vec<i32>,
    pub data_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub system_prompt_file: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_concurrent_subquestions: usize,
    pub history_turns: usize,
    pub planner: PlannerKind,
    pub retry: RetryPolicy,
    pub api_key: Option<String>,
    pub generation_model: String,
    pub embedding_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            years: DEFAULT_YEARS.to_vec(),
            data_dir: PathBuf::from("./data/UBER"),
            storage_dir: PathBuf::from("./storage"),
            system_prompt_file: PathBuf::from("system_prompt.txt"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: 3,
            max_concurrent_subquestions: 4,
            history_turns: 3,
            planner: PlannerKind::Rules,
            retry: RetryPolicy::default(),
            api_key: None,
            generation_model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(raw) = lookup("FILING_QA_YEARS") {
            settings.years = parse_years(&raw)?;
        }
        if let Some(dir) = lookup("FILING_QA_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("FILING_QA_STORAGE_DIR") {
            settings.storage_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("FILING_QA_SYSTEM_PROMPT_FILE") {
            settings.system_prompt_file = PathBuf::from(file);
        }

        settings.chunk_size = parse_number(&lookup, "FILING_QA_CHUNK_SIZE", settings.chunk_size)?;
        settings.chunk_overlap =
            parse_number(&lookup, "FILING_QA_CHUNK_OVERLAP", settings.chunk_overlap)?;
        settings.top_k = parse_number(&lookup, "FILING_QA_TOP_K", settings.top_k)?;
        settings.max_concurrent_subquestions = parse_number(
            &lookup,
            "FILING_QA_MAX_CONCURRENCY",
            settings.max_concurrent_subquestions,
        )?;
        settings.history_turns =
            parse_number(&lookup, "FILING_QA_HISTORY_TURNS", settings.history_turns)?;
        settings.retry.max_retries =
            parse_number(&lookup, "FILING_QA_MAX_RETRIES", settings.retry.max_retries)?;

        if let Some(planner) = lookup("FILING_QA_PLANNER") {
            settings.planner = planner.parse()?;
        }
        if let Some(model) = lookup("FILING_QA_GENERATION_MODEL") {
            settings.generation_model = model;
        }
        if let Some(model) = lookup("FILING_QA_EMBEDDING_MODEL") {
            settings.embedding_model = model;
        }

        settings.api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("GOOGLE_API_KEY"))
            .filter(|key| !key.trim().is_empty() && key != "your_gemini_api_key_here");

        if settings.api_key.is_none() {
            warn!("GEMINI_API_KEY not set, falling back to offline embedding/generation backends");
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Replace the configured years (CLI override).
    pub fn with_years(mut self, years: Vec<i32>) -> Result<Self> {
        self.years = years;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&mut self) -> Result<()> {
        self.years.sort_unstable();
        self.years.dedup();

        if self.years.is_empty() {
            return Err(AgentError::ConfigurationError(
                "No years configured".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(AgentError::ConfigurationError(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AgentError::ConfigurationError(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 || self.max_concurrent_subquestions == 0 {
            return Err(AgentError::ConfigurationError(
                "top_k and max concurrency must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Optional operator-supplied system prompt, prepended to generation prompts.
    pub fn load_system_prompt(&self) -> Option<String> {
        match std::fs::read_to_string(&self.system_prompt_file) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        }
    }
}

fn parse_years(raw: &str) -> Result<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>().map_err(|_| {
                AgentError::ConfigurationError(format!("Invalid year '{}' in FILING_QA_YEARS", s))
            })
        })
        .collect()
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            AgentError::ConfigurationError(format!("Invalid value '{}' for {}", raw, key))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_data_layout() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.years, vec![2019, 2020, 2021, 2022]);
        assert_eq!(settings.chunk_size, 512);
        assert_eq!(settings.planner, PlannerKind::Rules);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_years_are_sorted_and_deduplicated() {
        let settings =
            Settings::from_lookup(lookup_from(&[("FILING_QA_YEARS", "2021, 2019,2021")])).unwrap();
        assert_eq!(settings.years, vec![2019, 2021]);
    }

    #[test]
    fn test_empty_year_set_is_configuration_error() {
        let result = Settings::from_lookup(lookup_from(&[("FILING_QA_YEARS", " , ")]));
        assert!(matches!(result, Err(AgentError::ConfigurationError(_))));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = Settings::from_lookup(lookup_from(&[("FILING_QA_TOP_K", "many")]));
        assert!(matches!(result, Err(AgentError::ConfigurationError(_))));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let result = Settings::from_lookup(lookup_from(&[
            ("FILING_QA_CHUNK_SIZE", "10"),
            ("FILING_QA_CHUNK_OVERLAP", "10"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_api_key_falls_back_to_google_variable() {
        let settings =
            Settings::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "abc123")])).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("abc123"));
    }
}
