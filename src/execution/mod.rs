//! Sub-question execution
//!
//! Runs every sub-question against its bound tool. Executions are
//! independent and run concurrently behind a semaphore; the returned list
//! keeps creation order no matter which finishes first. A failure marks
//! only its own sub-question, except a configuration failure, which is also
//! reported to the caller so the run can stop.

use crate::backend::Backends;
use crate::error::AgentError;
use crate::models::{SubQuestion, SubQuestionStatus};
use crate::tools::{RetrievalOptions, ToolRegistry};
use futures::future::join_all;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Maximum sub-questions accepted for one question
const MAX_SUB_QUESTIONS: usize = 32;

/// Settled sub-questions plus the first fatal error, in creation order.
#[derive(Debug)]
pub struct Executed {
    pub sub_questions: Vec<SubQuestion>,
    pub fatal: Option<AgentError>,
}

pub struct ExecutionEngine {
    backends: Backends,
    options: RetrievalOptions,
    max_concurrency: usize,
}

impl ExecutionEngine {
    pub fn new(backends: Backends, options: RetrievalOptions, max_concurrency: usize) -> Self {
        Self {
            backends,
            options,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute all sub-questions and wait for every one to settle.
    pub async fn execute_all(
        &self,
        sub_questions: Vec<SubQuestion>,
        registry: &ToolRegistry,
    ) -> Executed {
        let mut sub_questions = sub_questions;
        if sub_questions.len() > MAX_SUB_QUESTIONS {
            warn!(
                requested = sub_questions.len(),
                limit = MAX_SUB_QUESTIONS,
                "Too many sub-questions, marking overflow as failed"
            );
            for sub in sub_questions.iter_mut().skip(MAX_SUB_QUESTIONS) {
                sub.status = SubQuestionStatus::Failed;
                sub.error = Some("Sub-question limit exceeded".to_string());
            }
        }

        let semaphore = Semaphore::new(self.max_concurrency);
        let permits = &semaphore;

        let runs = sub_questions.into_iter().map(move |sub| async move {
            if sub.status == SubQuestionStatus::Failed {
                return (sub, None);
            }
            match permits.acquire().await {
                Ok(_permit) => self.execute_one(sub, registry).await,
                Err(_) => (fail(sub, "execution pool closed".to_string(), 0), None),
            }
        });

        let mut fatal = None;
        let mut settled = Vec::new();
        for (sub, error) in join_all(runs).await {
            if fatal.is_none() {
                fatal = error;
            }
            settled.push(sub);
        }

        Executed {
            sub_questions: settled,
            fatal,
        }
    }

    /// The error is returned alongside the sub-question only when it is fatal.
    async fn execute_one(
        &self,
        mut sub: SubQuestion,
        registry: &ToolRegistry,
    ) -> (SubQuestion, Option<AgentError>) {
        let start = Instant::now();

        let Some(tool) = registry.get(&sub.tool_name) else {
            warn!(
                order = sub.order,
                tool_name = %sub.tool_name,
                "Tool not registered"
            );
            let error = AgentError::ToolNotFound(sub.tool_name.clone()).to_string();
            return (fail(sub, error, 0), None);
        };

        debug!(order = sub.order, tool_name = %sub.tool_name, "Executing sub-question");

        match tool.query(&sub.text, &self.backends, &self.options).await {
            Ok(answer) => {
                sub.execution_time_ms = start.elapsed().as_millis() as u64;
                sub.answer = Some(answer);
                sub.status = SubQuestionStatus::Answered;
                (sub, None)
            }
            Err(e) => {
                warn!(
                    order = sub.order,
                    tool_name = %sub.tool_name,
                    error = %e,
                    "Sub-question failed"
                );
                let elapsed = start.elapsed().as_millis() as u64;
                let failed = fail(sub, e.to_string(), elapsed);
                (failed, e.is_fatal().then_some(e))
            }
        }
    }
}

fn fail(mut sub: SubQuestion, error: String, elapsed_ms: u64) -> SubQuestion {
    sub.status = SubQuestionStatus::Failed;
    sub.answer = None;
    sub.error = Some(error);
    sub.execution_time_ms = elapsed_ms;
    sub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmbeddingBackend, GenerationBackend, HashEmbedder};
    use crate::config::RetryPolicy;
    use crate::index::{IndexedChunk, YearIndex, INDEX_FORMAT_VERSION};
    use crate::tools::QueryTool;
    use crate::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    /// Echoes the year found in the prompt; 2019 answers slowest.
    struct YearEchoGenerator;

    #[async_trait]
    impl GenerationBackend for YearEchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("fiscal year 2019") {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Ok("answer 2019".to_string());
            }
            if prompt.contains("fiscal year 2021") {
                return Err(AgentError::BackendError("overloaded".to_string()));
            }
            if prompt.contains("fiscal year 2022") {
                return Err(AgentError::ConfigurationError("API key rejected (401)".to_string()));
            }
            Ok("answer 2020".to_string())
        }
    }

    async fn registry(years: &[i32]) -> ToolRegistry {
        let embedder = HashEmbedder::default();
        let mut tools = Vec::new();
        for &year in years {
            let text = format!("Filing text for {}", year);
            let embedding = embedder.embed_one(&text).await.unwrap();
            tools.push(QueryTool::new(Arc::new(YearIndex {
                format_version: INDEX_FORMAT_VERSION,
                year,
                built_at: Utc::now(),
                source_fingerprint: String::new(),
                backing_store_path: PathBuf::new(),
                embedding_model: embedder.model_id().to_string(),
                chunks: vec![IndexedChunk {
                    chunk_id: 0,
                    file_name: format!("UBER_{}.html", year),
                    text,
                    embedding,
                }],
            })));
        }
        ToolRegistry::new(tools)
    }

    fn engine() -> ExecutionEngine {
        let backends = Backends::new(Arc::new(HashEmbedder::default()), Arc::new(YearEchoGenerator));
        let options = RetrievalOptions {
            top_k: 1,
            retry: RetryPolicy::immediate(1),
        };
        ExecutionEngine::new(backends, options, 4)
    }

    #[tokio::test]
    async fn test_results_keep_creation_order() {
        let registry = registry(&[2019, 2020]).await;
        let subs = vec![
            SubQuestion::new(1, "Revenue?", "year_2019"),
            SubQuestion::new(2, "Revenue?", "year_2020"),
        ];

        let done = engine().execute_all(subs, &registry).await.sub_questions;

        assert_eq!(done[0].answer.as_deref(), Some("answer 2019"));
        assert_eq!(done[1].answer.as_deref(), Some("answer 2020"));
        assert!(done.iter().all(|s| s.is_answered()));
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let registry = registry(&[2019, 2020, 2021]).await;
        let subs = vec![
            SubQuestion::new(1, "Revenue?", "year_2019"),
            SubQuestion::new(2, "Revenue?", "year_2021"),
            SubQuestion::new(3, "Revenue?", "year_2020"),
        ];

        let executed = engine().execute_all(subs, &registry).await;
        assert!(executed.fatal.is_none());
        let done = executed.sub_questions;

        assert_eq!(done[0].status, SubQuestionStatus::Answered);
        assert_eq!(done[1].status, SubQuestionStatus::Failed);
        assert!(done[1].answer.is_none());
        assert!(done[1].error.as_deref().unwrap().contains("overloaded"));
        assert_eq!(done[2].status, SubQuestionStatus::Answered);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_sub_question() {
        let registry = registry(&[2019]).await;
        let subs = vec![SubQuestion::new(1, "Revenue?", "year_1999")];

        let executed = engine().execute_all(subs, &registry).await;
        assert!(executed.fatal.is_none());
        let done = executed.sub_questions;

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, SubQuestionStatus::Failed);
        assert!(done[0].error.as_deref().unwrap().contains("year_1999"));
    }

    #[tokio::test]
    async fn test_configuration_failure_is_reported() {
        let registry = registry(&[2019, 2022]).await;
        let subs = vec![
            SubQuestion::new(1, "Revenue?", "year_2022"),
            SubQuestion::new(2, "Revenue?", "year_2019"),
        ];

        let executed = engine().execute_all(subs, &registry).await;

        assert_eq!(executed.sub_questions[0].status, SubQuestionStatus::Failed);
        assert_eq!(executed.sub_questions[1].status, SubQuestionStatus::Answered);
        assert!(matches!(executed.fatal, Some(AgentError::ConfigurationError(_))));
    }
}
