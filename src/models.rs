//! Core data models for the filing Q&A agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Documents =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub year: i32,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A loaded source document for one fiscal year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(year: i32, file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                year,
                file_name: file_name.into(),
                extra: BTreeMap::new(),
            },
        }
    }

    pub fn year(&self) -> i32 {
        self.metadata.year
    }
}

//
// ================= Sub-questions =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubQuestionStatus {
    Pending,
    Answered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub sub_question_id: Uuid,
    /// Creation order within the parent question, starting at 1.
    pub order: u32,
    pub text: String,
    pub tool_name: String,
    pub answer: Option<String>,
    pub status: SubQuestionStatus,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl SubQuestion {
    pub fn new(order: u32, text: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            sub_question_id: Uuid::new_v4(),
            order,
            text: text.into(),
            tool_name: tool_name.into(),
            answer: None,
            status: SubQuestionStatus::Pending,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.status == SubQuestionStatus::Answered
    }
}

//
// ================= Answers =================
//

/// Result of one decomposition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub final_answer: String,
    pub sub_questions: Vec<SubQuestion>,
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    NoRelevantData,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub question: String,
    pub sub_questions: Vec<SubQuestion>,
    pub final_answer: String,
    pub outcome: TurnOutcome,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn answered(question: String, result: AnswerResult) -> Self {
        let outcome = if result.sub_questions.is_empty() {
            TurnOutcome::NoRelevantData
        } else {
            TurnOutcome::Answered
        };

        Self {
            turn_id: Uuid::new_v4(),
            question,
            sub_questions: result.sub_questions,
            final_answer: result.final_answer,
            outcome,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(question: String, sub_questions: Vec<SubQuestion>, error: String) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            question,
            sub_questions,
            final_answer: UNABLE_TO_ANSWER.to_string(),
            outcome: TurnOutcome::Error,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

pub const NO_RELEVANT_DATA: &str =
    "No relevant data was found for this question in the indexed filings.";

pub const UNABLE_TO_ANSWER: &str = "Unable to answer this question.";

impl fmt::Display for SubQuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubQuestionStatus::Pending => "pending",
            SubQuestionStatus::Answered => "answered",
            SubQuestionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
