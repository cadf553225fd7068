//! LLM-backed planner
//!
//! Asks the generation backend to decompose the question against the tool
//! list. Output is validated only for shape: a sub-question naming an
//! unknown tool is kept and fails at execution time. Unusable output falls
//! back to the rule-based planner.

use crate::backend::{with_retry, GenerationBackend};
use crate::config::RetryPolicy;
use crate::error::AgentError;
use crate::models::SubQuestion;
use crate::planner::{QuestionPlanner, RuleBasedPlanner};
use crate::tools::QueryTool;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on sub-questions accepted from one plan.
const MAX_SUB_QUESTIONS: usize = 12;

pub struct LlmPlanner {
    generator: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
}

impl LlmPlanner {
    pub fn new(generator: Arc<dyn GenerationBackend>, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    fn build_prompt(question: &str, tools: &[QueryTool]) -> String {
        let tool_descriptions = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are a query planning engine for questions about annual reports.

Break the user question into the sub-questions needed to answer it.
Each sub-question must be answerable by exactly ONE of the tools below.

Available tools:
{}

Rules:
- Use only the tool names listed above
- One sub-question per fiscal year that is needed
- Order sub-questions chronologically
- Return ONLY valid JSON, no explanation text
- JSON format:

{{
  "sub_questions": [
    {{ "sub_question": "...", "tool_name": "year_2019" }}
  ]
}}

USER QUESTION:
{}
"#,
            tool_descriptions, question
        )
    }
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    sub_questions: Vec<PlannedSubQuestion>,
}

#[derive(Debug, Deserialize)]
struct PlannedSubQuestion {
    sub_question: String,
    tool_name: String,
}

#[async_trait]
impl QuestionPlanner for LlmPlanner {
    async fn plan(&self, question: &str, tools: &[QueryTool]) -> Result<Vec<SubQuestion>> {
        let prompt = Self::build_prompt(question, tools);

        let response = match with_retry(&self.retry, "plan", || self.generator.generate(&prompt)).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "LLM planning failed, using rule-based routing");
                return Ok(RuleBasedPlanner::plan_sync(question, tools));
            }
        };

        match parse_plan_response(&response) {
            Ok(subs) if !subs.is_empty() => {
                debug!(count = subs.len(), "LLM plan accepted");
                Ok(subs)
            }
            Ok(_) => {
                warn!("LLM plan was empty, using rule-based routing");
                Ok(RuleBasedPlanner::plan_sync(question, tools))
            }
            Err(e) => {
                warn!(error = %e, "LLM plan unparseable, using rule-based routing");
                Ok(RuleBasedPlanner::plan_sync(question, tools))
            }
        }
    }
}

/// Parse plan response, tolerating markdown code fences.
fn parse_plan_response(response: &str) -> Result<Vec<SubQuestion>> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let plan: PlanResponse = serde_json::from_str(cleaned).map_err(|e| {
        AgentError::BackendError(format!(
            "Failed to parse plan response: {} | raw={}",
            e, response
        ))
    })?;

    Ok(plan
        .sub_questions
        .into_iter()
        .filter(|s| !s.sub_question.trim().is_empty())
        .take(MAX_SUB_QUESTIONS)
        .enumerate()
        .map(|(i, s)| SubQuestion::new(i as u32 + 1, s.sub_question.trim(), s.tool_name.trim()))
        .collect())
}
