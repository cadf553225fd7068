//! Error types for the filing Q&A agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Index build error for {year}: {reason}")]
    IndexBuildError { year: i32, reason: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Answer synthesis error: {0}")]
    AnswerSynthesisError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Document loading error: {0}")]
    LoaderError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    pub fn index_build(year: i32, reason: impl Into<String>) -> Self {
        AgentError::IndexBuildError {
            year,
            reason: reason.into(),
        }
    }

    /// Only backend failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::BackendError(_))
    }

    /// Errors that must end the current operation instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::ConfigurationError(_))
    }
}
