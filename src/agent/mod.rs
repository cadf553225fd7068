//! Decomposition engine - implements the answer loop
//!
//! QUESTION → PLAN → EXECUTE (concurrent) → JOIN → SYNTHESIZE

use crate::backend::{with_retry, Backends, GenerationBackend, CONTEXT_CLOSE, CONTEXT_OPEN};
use crate::config::{PlannerKind, RetryPolicy, Settings};
use crate::error::AgentError;
use crate::execution::ExecutionEngine;
use crate::models::{AnswerResult, SubQuestion, NO_RELEVANT_DATA};
use crate::planner::{LlmPlanner, QuestionPlanner, RuleBasedPlanner};
use crate::tools::{QueryTool, RetrievalOptions, ToolRegistry};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one run, keeping the sub-questions even when the run failed.
#[derive(Debug)]
pub struct Attempt {
    pub sub_questions: Vec<SubQuestion>,
    pub outcome: Result<String>,
}

impl Attempt {
    fn failed(sub_questions: Vec<SubQuestion>, error: AgentError) -> Self {
        Self {
            sub_questions,
            outcome: Err(error),
        }
    }

    pub fn into_result(self) -> Result<AnswerResult> {
        let final_answer = self.outcome?;
        Ok(AnswerResult {
            final_answer,
            sub_questions: self.sub_questions,
        })
    }
}

/// Splits a question into per-year sub-questions and merges their answers
pub struct DecompositionEngine {
    planner: Box<dyn QuestionPlanner>,
    executor: ExecutionEngine,
    generator: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
}

impl DecompositionEngine {
    pub fn new(
        planner: Box<dyn QuestionPlanner>,
        executor: ExecutionEngine,
        generator: Arc<dyn GenerationBackend>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            planner,
            executor,
            generator,
            retry,
        }
    }

    /// Wire an engine from settings and already constructed backends.
    pub fn from_settings(settings: &Settings, backends: Backends) -> Self {
        let planner: Box<dyn QuestionPlanner> = match settings.planner {
            PlannerKind::Rules => Box::new(RuleBasedPlanner),
            PlannerKind::Llm => Box::new(LlmPlanner::new(
                backends.generator.clone(),
                settings.retry.clone(),
            )),
        };
        let options = RetrievalOptions {
            top_k: settings.top_k,
            retry: settings.retry.clone(),
        };
        let generator = backends.generator.clone();
        let executor = ExecutionEngine::new(backends, options, settings.max_concurrent_subquestions);

        Self::new(planner, executor, generator, settings.retry.clone())
    }

    /// Answer `question` using only `tools`.
    pub async fn answer(&self, question: &str, tools: &[QueryTool]) -> Result<AnswerResult> {
        self.attempt(question, tools, None).await.into_result()
    }

    /// Run the full loop; `history` is prior conversation text for synthesis.
    pub async fn attempt(&self, question: &str, tools: &[QueryTool], history: Option<&str>) -> Attempt {
        let start = Instant::now();

        if tools.is_empty() {
            return Attempt::failed(
                Vec::new(),
                AgentError::ConfigurationError("No query tools available".to_string()),
            );
        }

        info!(question = %question, tools = tools.len(), "Decomposing question");

        // === PLAN ===
        let planned = match self.planner.plan(question, tools).await {
            Ok(planned) => planned,
            Err(e) => return Attempt::failed(Vec::new(), e),
        };

        if planned.is_empty() {
            info!("No sub-questions routed, answering with no relevant data");
            return Attempt {
                sub_questions: Vec::new(),
                outcome: Ok(NO_RELEVANT_DATA.to_string()),
            };
        }

        debug!(
            count = planned.len(),
            tools = ?planned.iter().map(|s| s.tool_name.as_str()).collect::<Vec<_>>(),
            "Sub-questions planned"
        );

        // === EXECUTE ===
        let registry = ToolRegistry::new(tools.to_vec());
        let executed = self.executor.execute_all(planned, &registry).await;
        let sub_questions = executed.sub_questions;

        if let Some(fatal) = executed.fatal {
            warn!(error = %fatal, "Sub-question hit a configuration failure, stopping");
            return Attempt::failed(sub_questions, fatal);
        }

        let answered = sub_questions.iter().filter(|s| s.is_answered()).count();
        if answered == 0 {
            warn!(count = sub_questions.len(), "Every sub-question failed");
            let reasons = sub_questions
                .iter()
                .filter_map(|s| s.error.as_deref().map(|e| format!("{}: {}", s.tool_name, e)))
                .collect::<Vec<_>>()
                .join("; ");
            return Attempt::failed(sub_questions, AgentError::AnswerSynthesisError(reasons));
        }

        // === SYNTHESIZE ===
        let outcome = self.synthesize(question, &sub_questions, history).await;

        info!(
            sub_questions = sub_questions.len(),
            answered,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Question processed"
        );

        Attempt {
            sub_questions,
            outcome,
        }
    }

    async fn synthesize(
        &self,
        question: &str,
        sub_questions: &[SubQuestion],
        history: Option<&str>,
    ) -> Result<String> {
        let answered: Vec<&SubQuestion> = sub_questions.iter().filter(|s| s.is_answered()).collect();

        // A lone answer already speaks for the whole question.
        if let [only] = answered.as_slice() {
            if history.is_none() {
                return Ok(only.answer.clone().unwrap_or_default());
            }
        }

        let prompt = build_synthesis_prompt(question, &answered, history);
        let answer = with_retry(&self.retry, "synthesis", || self.generator.generate(&prompt)).await?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AgentError::AnswerSynthesisError(
                "Generation backend returned an empty answer".to_string(),
            ));
        }
        Ok(answer.to_string())
    }
}

fn build_synthesis_prompt(question: &str, answered: &[&SubQuestion], history: Option<&str>) -> String {
    let mut prompt = String::new();

    if let Some(history) = history.filter(|h| !h.trim().is_empty()) {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(history.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("Answers to the sub-questions, one per fiscal year:\n");
    prompt.push_str(CONTEXT_OPEN);
    prompt.push('\n');
    for sub in answered {
        prompt.push_str(&format!(
            "Sub question: {}\nResponse: {}\n\n",
            sub.text,
            sub.answer.as_deref().unwrap_or_default()
        ));
    }
    prompt.push_str(CONTEXT_CLOSE);
    prompt.push_str(&format!(
        "\nCombine the responses above into one answer.\nQuestion: {}\nAnswer:",
        question
    ));

    prompt
}
