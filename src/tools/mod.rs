//! Query tools and registry
//!
//! Every year index is exposed as one `QueryTool` named `year_<N>`.
//! The registry is a plain ordered list plus name lookup; routing never
//! looks inside an index, only at tool names, years and descriptions.

use crate::backend::{with_retry, Backends, CONTEXT_CLOSE, CONTEXT_OPEN};
use crate::config::RetryPolicy;
use crate::error::AgentError;
use crate::index::{RetrievedChunk, YearIndex};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

const TOOL_NAME_PREFIX: &str = "year_";

/// Tool name for a fiscal year.
pub fn tool_name_for(year: i32) -> String {
    format!("{}{}", TOOL_NAME_PREFIX, year)
}

/// Routing description for a fiscal year.
pub fn tool_description_for(year: i32) -> String {
    format!(
        "Provides financial and operational information about the company for fiscal year {}, \
         drawn from its annual report (year {}).",
        year, year
    )
}

/// Retrieval knobs shared by every tool call.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub retry: RetryPolicy,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Named, described wrapper around exactly one year index.
#[derive(Debug, Clone)]
pub struct QueryTool {
    name: String,
    description: String,
    year: i32,
    index: Arc<YearIndex>,
}

impl QueryTool {
    pub fn new(index: Arc<YearIndex>) -> Self {
        let year = index.year;
        Self {
            name: tool_name_for(year),
            description: tool_description_for(year),
            year,
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn index(&self) -> &YearIndex {
        &self.index
    }

    /// Retrieve the most relevant chunks for `question`.
    pub async fn retrieve(
        &self,
        question: &str,
        backends: &Backends,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        let embedding = with_retry(&options.retry, "embed_query", || {
            backends.embedder.embed_one(question)
        })
        .await?;

        let hits = self.index.search(&embedding, options.top_k);
        if hits.is_empty() {
            return Err(AgentError::RetrievalError(format!(
                "{} returned no content",
                self.name
            )));
        }

        debug!(
            tool_name = %self.name,
            hits = hits.len(),
            best_score = hits[0].score,
            "Retrieved chunks"
        );

        Ok(hits)
    }

    /// Answer `question` from this year's index only.
    pub async fn query(
        &self,
        question: &str,
        backends: &Backends,
        options: &RetrievalOptions,
    ) -> Result<String> {
        let hits = self.retrieve(question, backends, options).await?;
        let prompt = build_query_prompt(self.year, question, &hits);

        let answer = with_retry(&options.retry, "tool_answer", || {
            backends.generator.generate(&prompt)
        })
        .await?;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(AgentError::RetrievalError(format!(
                "{} produced an empty answer",
                self.name
            )));
        }

        Ok(answer)
    }
}

fn build_query_prompt(year: i32, question: &str, hits: &[RetrievedChunk]) -> String {
    let context = hits
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information from the fiscal year {} annual report is below.\n\
         {}\n{}\n{}\n\
         Using only the context above, answer the question.\n\
         Question: {}\n\
         Answer:",
        year, CONTEXT_OPEN, context, CONTEXT_CLOSE, question
    )
}

/// Build one tool per index, ordered by ascending year.
pub fn build_tools(indices: &BTreeMap<i32, Arc<YearIndex>>) -> Result<Vec<QueryTool>> {
    if indices.is_empty() {
        return Err(AgentError::ConfigurationError(
            "No year indices available to build tools from".to_string(),
        ));
    }

    indices
        .iter()
        .map(|(year, index)| {
            if index.year != *year {
                return Err(AgentError::ConfigurationError(format!(
                    "index registered under {} belongs to {}",
                    year, index.year
                )));
            }
            Ok(QueryTool::new(index.clone()))
        })
        .collect()
}

/// Tool registry for looking up tools by name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<QueryTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<QueryTool>) -> Self {
        let by_name = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name().to_string(), i))
            .collect();
        Self { tools, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&QueryTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn for_year(&self, year: i32) -> Option<&QueryTool> {
        self.get(&tool_name_for(year))
    }

    pub fn tools(&self) -> &[QueryTool] {
        &self.tools
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
