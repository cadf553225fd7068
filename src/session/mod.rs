//! Interactive session loop
//!
//! AWAITING INPUT → PROCESSING → PRESENTING → AWAITING INPUT, terminal CLOSED.
//!
//! The loop suspends only while waiting for input and while the engine
//! works; both waits race the cancellation token. A cancelled turn is
//! dropped whole, so the session history never holds a partial turn.

use crate::agent::DecompositionEngine;
use crate::models::{AnswerResult, ConversationTurn};
use crate::tools::QueryTool;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod context;
pub mod io;
pub mod state;

pub use context::{HistoryConfig, HistoryWindow};
pub use io::{
    format_turn, spawn_line_reader, ChannelQuestions, LineQuestions, StdinQuestions, StdoutPresenter,
    TextPresenter,
};
pub use state::SessionState;

const EXIT_SENTINELS: &[&str] = &["exit", "quit", ":q"];

/// Input boundary: `None` means end of input.
#[async_trait]
pub trait QuestionSource: Send {
    async fn next_question(&mut self) -> Result<Option<String>>;
}

/// Output boundary for completed turns.
#[async_trait]
pub trait AnswerSink: Send {
    async fn present(&mut self, turn: &ConversationTurn) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingInput,
    Processing,
    Presenting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ExitRequested,
    EndOfInput,
    Cancelled,
}

pub fn is_exit_sentinel(line: &str) -> bool {
    let line = line.trim();
    EXIT_SENTINELS.iter().any(|s| line.eq_ignore_ascii_case(s))
}

pub struct InteractiveSession {
    engine: Arc<DecompositionEngine>,
    tools: Vec<QueryTool>,
    state: SessionState,
    history: HistoryWindow,
    phase: SessionPhase,
    cancel: CancellationToken,
}

impl InteractiveSession {
    pub fn new(engine: Arc<DecompositionEngine>, tools: Vec<QueryTool>, cancel: CancellationToken) -> Self {
        Self {
            engine,
            tools,
            state: SessionState::new(),
            history: HistoryWindow::default(),
            phase: SessionPhase::AwaitingInput,
            cancel,
        }
    }

    pub fn with_history(mut self, config: HistoryConfig) -> Self {
        self.history = HistoryWindow::new(config);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Drive the loop until exit, end of input or cancellation.
    ///
    /// A configuration error closes the session and is returned; any other
    /// failure becomes an error turn and the loop keeps going.
    pub async fn run<S, P>(&mut self, input: &mut S, output: &mut P) -> Result<CloseReason>
    where
        S: QuestionSource + ?Sized,
        P: AnswerSink + ?Sized,
    {
        if self.phase == SessionPhase::Closed {
            return Ok(CloseReason::Cancelled);
        }

        info!(session_id = %self.state.session_id, tools = self.tools.len(), "Session started");

        loop {
            // === AWAITING INPUT ===
            self.phase = SessionPhase::AwaitingInput;

            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                line = input.next_question() => Some(line),
            };

            let line = match line {
                None => return Ok(self.close(CloseReason::Cancelled)),
                Some(Err(e)) => {
                    self.phase = SessionPhase::Closed;
                    return Err(e);
                }
                Some(Ok(None)) => return Ok(self.close(CloseReason::EndOfInput)),
                Some(Ok(Some(line))) => line,
            };

            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if is_exit_sentinel(question) {
                return Ok(self.close(CloseReason::ExitRequested));
            }

            // === PROCESSING ===
            self.phase = SessionPhase::Processing;
            let history = self.history.render(&self.state);

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                attempt = self.engine.attempt(question, &self.tools, history.as_deref()) => Some(attempt),
            };

            let Some(attempt) = attempt else {
                warn!(question = %question, "Cancelled while processing, turn discarded");
                return Ok(self.close(CloseReason::Cancelled));
            };

            let turn = match attempt.outcome {
                Ok(final_answer) => ConversationTurn::answered(
                    question.to_string(),
                    AnswerResult {
                        final_answer,
                        sub_questions: attempt.sub_questions,
                    },
                ),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Configuration error, closing session");
                    self.phase = SessionPhase::Closed;
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Question failed, recording error turn");
                    ConversationTurn::failed(question.to_string(), attempt.sub_questions, e.to_string())
                }
            };

            // === PRESENTING ===
            self.phase = SessionPhase::Presenting;
            debug!(outcome = ?turn.outcome, sub_questions = turn.sub_questions.len(), "Presenting turn");
            self.state.push(turn);

            if let Some(turn) = self.state.last() {
                if let Err(e) = output.present(turn).await {
                    self.phase = SessionPhase::Closed;
                    return Err(e);
                }
            }
        }
    }

    fn close(&mut self, reason: CloseReason) -> CloseReason {
        self.phase = SessionPhase::Closed;
        info!(
            session_id = %self.state.session_id,
            turns = self.state.len(),
            reason = ?reason,
            "Session closed"
        );
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backends, GenerationBackend, HashEmbedder};
    use crate::config::RetryPolicy;
    use crate::error::AgentError;
    use crate::execution::ExecutionEngine;
    use crate::models::{TurnOutcome, UNABLE_TO_ANSWER};
    use crate::planner::RuleBasedPlanner;
    use crate::test_support::tool_for;
    use crate::tools::RetrievalOptions;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedQuestions(VecDeque<&'static str>);

    #[async_trait]
    impl QuestionSource for ScriptedQuestions {
        async fn next_question(&mut self) -> Result<Option<String>> {
            Ok(self.0.pop_front().map(str::to_string))
        }
    }

    /// Never yields input, like a user who walked away.
    struct SilentQuestions;

    #[async_trait]
    impl QuestionSource for SilentQuestions {
        async fn next_question(&mut self) -> Result<Option<String>> {
            futures::future::pending().await
        }
    }

    #[derive(Default)]
    struct CollectingSink(Vec<ConversationTurn>);

    #[async_trait]
    impl AnswerSink for CollectingSink {
        async fn present(&mut self, turn: &ConversationTurn) -> Result<()> {
            self.0.push(turn.clone());
            Ok(())
        }
    }

    /// Fails every year named in `failing`, hangs forever on "hang".
    #[derive(Default)]
    struct TestGenerator {
        failing: Vec<i32>,
        reject_key: bool,
    }

    #[async_trait]
    impl GenerationBackend for TestGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("hang") {
                return futures::future::pending().await;
            }
            if self.reject_key {
                return Err(AgentError::ConfigurationError(
                    "Gemini rejected the API key (401)".to_string(),
                ));
            }
            for year in &self.failing {
                if prompt.contains(&format!("fiscal year {} annual report", year)) {
                    return Err(AgentError::BackendError("backend down".to_string()));
                }
            }
            Ok(crate::backend::extract_context_block(prompt)
                .unwrap_or("no context")
                .to_string())
        }
    }

    fn engine(failing: Vec<i32>) -> Arc<DecompositionEngine> {
        engine_with(TestGenerator {
            failing,
            ..Default::default()
        })
    }

    fn engine_with(generator: TestGenerator) -> Arc<DecompositionEngine> {
        let generator = Arc::new(generator);
        let backends = Backends::new(Arc::new(HashEmbedder::default()), generator.clone());
        let options = RetrievalOptions {
            top_k: 1,
            retry: RetryPolicy::immediate(0),
        };
        Arc::new(DecompositionEngine::new(
            Box::new(RuleBasedPlanner),
            ExecutionEngine::new(backends, options, 2),
            generator,
            RetryPolicy::immediate(0),
        ))
    }

    async fn tools() -> Vec<QueryTool> {
        vec![
            tool_for(2019, &["Revenue was $14.1 billion."]).await,
            tool_for(2020, &["Revenue was $11.1 billion."]).await,
        ]
    }

    fn script(lines: &[&'static str]) -> ScriptedQuestions {
        ScriptedQuestions(lines.iter().copied().collect())
    }

    #[test]
    fn test_exit_sentinels() {
        assert!(is_exit_sentinel("exit"));
        assert!(is_exit_sentinel("  QUIT "));
        assert!(is_exit_sentinel(":q"));
        assert!(!is_exit_sentinel("exit strategy in 2019?"));
    }

    #[tokio::test]
    async fn test_turns_recorded_until_exit() {
        let mut session = InteractiveSession::new(engine(vec![]), tools().await, CancellationToken::new());
        let mut sink = CollectingSink::default();

        let reason = session
            .run(&mut script(&["Revenue in 2019?", "", "   ", "Revenue in 2020?", "exit", "ignored"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(reason, CloseReason::ExitRequested);
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(session.state().len(), 2);
        assert_eq!(sink.0.len(), 2);
        assert!(sink.0[0].final_answer.contains("$14.1 billion"));
        assert_eq!(sink.0[1].outcome, TurnOutcome::Answered);
    }

    #[tokio::test]
    async fn test_end_of_input_closes() {
        let mut session = InteractiveSession::new(engine(vec![]), tools().await, CancellationToken::new());
        let reason = session
            .run(&mut script(&[]), &mut CollectingSink::default())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::EndOfInput);
        assert!(session.state().is_empty());
    }

    #[tokio::test]
    async fn test_failed_turn_is_recorded_and_loop_continues() {
        let mut session = InteractiveSession::new(engine(vec![2019]), tools().await, CancellationToken::new());
        let mut sink = CollectingSink::default();

        session
            .run(&mut script(&["Revenue in 2019?", "Revenue in 2020?"]), &mut sink)
            .await
            .unwrap();

        let turns = session.state().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].outcome, TurnOutcome::Error);
        assert_eq!(turns[0].final_answer, UNABLE_TO_ANSWER);
        assert_eq!(turns[0].sub_questions.len(), 1);
        assert!(turns[0].error.is_some());
        assert_eq!(turns[1].outcome, TurnOutcome::Answered);
    }

    #[tokio::test]
    async fn test_configuration_error_closes_session() {
        let mut session = InteractiveSession::new(engine(vec![]), vec![], CancellationToken::new());

        let result = session
            .run(&mut script(&["Revenue in 2019?"]), &mut CollectingSink::default())
            .await;

        assert!(matches!(result, Err(AgentError::ConfigurationError(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(session.state().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_key_during_query_closes_session() {
        let engine = engine_with(TestGenerator {
            reject_key: true,
            ..Default::default()
        });
        let mut session = InteractiveSession::new(engine, tools().await, CancellationToken::new());
        let mut sink = CollectingSink::default();

        let result = session
            .run(
                &mut script(&["Revenue in 2019?", "Revenue in 2020?", "Revenue in 2019 and 2020?"]),
                &mut sink,
            )
            .await;

        assert!(matches!(result, Err(AgentError::ConfigurationError(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(session.state().is_empty());
        assert!(sink.0.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_processing_discards_turn() {
        let cancel = CancellationToken::new();
        let mut session = InteractiveSession::new(engine(vec![]), tools().await, cancel.clone());
        let mut sink = CollectingSink::default();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let reason = session
            .run(&mut script(&["Revenue in 2019?", "hang in 2020?"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(session.state().len(), 1);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(session.state().turns()[0].question, "Revenue in 2019?");
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_input() {
        let cancel = CancellationToken::new();
        let mut session = InteractiveSession::new(engine(vec![]), tools().await, cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let reason = session
            .run(&mut SilentQuestions, &mut CollectingSink::default())
            .await
            .unwrap();

        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(session.phase(), SessionPhase::Closed);
    }
}
