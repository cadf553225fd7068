//! Filing Q&A Agent
//!
//! Answers natural-language questions over a company's annual reports:
//! - Partitions filings by fiscal year, one persisted vector index per year
//! - Exposes each index as a named query tool
//! - Decomposes a question into per-year sub-questions and runs them concurrently
//! - Synthesizes one answer from the sub-answers, in creation order
//! - Drives an interactive, cancellable chat session
//!
//! ANSWER LOOP:
//! QUESTION → PLAN → EXECUTE → JOIN → SYNTHESIZE → PRESENT

pub mod agent;
pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod execution;
pub mod index;
pub mod loader;
pub mod models;
pub mod planner;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::DecompositionEngine;
pub use config::Settings;
pub use tools::{QueryTool, ToolRegistry};
