//! Terminal boundaries for the chat loop
//!
//! Stdin is read on a plain OS thread that feeds a channel. A read blocked
//! there never holds up runtime shutdown, so Ctrl-C exits the process
//! without waiting for another line.

use crate::models::{ConversationTurn, SubQuestionStatus, TurnOutcome};
use crate::session::{AnswerSink, QuestionSource};
use crate::Result;
use async_trait::async_trait;
use std::io::BufRead;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines, Stdout};
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_PROMPT: &str = "Ask a question about the filings (or 'exit'): ";

/// Reads one question per line, writing a prompt before each read.
pub struct LineQuestions<R, W> {
    lines: Lines<R>,
    prompt_out: W,
    prompt: String,
}

impl<R, W> LineQuestions<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, prompt_out: W) -> Self {
        Self {
            lines: reader.lines(),
            prompt_out,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl<R, W> QuestionSource for LineQuestions<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn next_question(&mut self) -> Result<Option<String>> {
        write_prompt(&mut self.prompt_out, &self.prompt).await?;
        Ok(self.lines.next_line().await?)
    }
}

/// Reads one question per line from a channel fed by `spawn_line_reader`.
pub struct ChannelQuestions<W> {
    lines: mpsc::Receiver<std::io::Result<String>>,
    prompt_out: W,
    prompt: String,
}

pub type StdinQuestions = ChannelQuestions<Stdout>;

impl<W: AsyncWrite + Unpin + Send> ChannelQuestions<W> {
    pub fn new(lines: mpsc::Receiver<std::io::Result<String>>, prompt_out: W) -> Self {
        Self {
            lines,
            prompt_out,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

impl StdinQuestions {
    pub fn stdin() -> Self {
        let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
        Self::new(lines, tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> QuestionSource for ChannelQuestions<W> {
    async fn next_question(&mut self) -> Result<Option<String>> {
        write_prompt(&mut self.prompt_out, &self.prompt).await?;
        match self.lines.recv().await {
            Some(line) => Ok(Some(line?)),
            None => Ok(None),
        }
    }
}

/// Read `reader` line by line on a dedicated thread.
///
/// The thread stops at end of input, after forwarding a read error, or once
/// the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    std::thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
        debug!("Line reader finished");
    });

    rx
}

async fn write_prompt<W: AsyncWrite + Unpin + Send>(out: &mut W, prompt: &str) -> Result<()> {
    if !prompt.is_empty() {
        out.write_all(prompt.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

/// Writes each turn as plain text: sub-questions first, then the answer.
pub struct TextPresenter<W> {
    out: W,
}

pub type StdoutPresenter = TextPresenter<Stdout>;

impl<W: AsyncWrite + Unpin + Send> TextPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl StdoutPresenter {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AnswerSink for TextPresenter<W> {
    async fn present(&mut self, turn: &ConversationTurn) -> Result<()> {
        self.out.write_all(format_turn(turn).as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

pub fn format_turn(turn: &ConversationTurn) -> String {
    let mut out = String::new();

    if !turn.sub_questions.is_empty() {
        out.push_str(&format!("Generated {} sub questions.\n", turn.sub_questions.len()));
        for sub in &turn.sub_questions {
            let marker = match sub.status {
                SubQuestionStatus::Answered => "",
                SubQuestionStatus::Failed => " [failed]",
                SubQuestionStatus::Pending => " [pending]",
            };
            out.push_str(&format!("[{}] Q: {}{}\n", sub.tool_name, sub.text, marker));
        }
        out.push('\n');
    }

    out.push_str(&turn.final_answer);
    out.push('\n');

    if turn.outcome == TurnOutcome::Error {
        if let Some(error) = &turn.error {
            out.push_str(&format!("(error: {})\n", error));
        }
    }
    out.push('\n');

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::models::{AnswerResult, SubQuestion};
    use std::io::{Cursor, Read};

    #[tokio::test]
    async fn test_line_questions_read_until_eof() {
        let input: &[u8] = b"first?\n\nsecond?\n";
        let mut questions = LineQuestions::new(input, Vec::new()).with_prompt("> ");

        assert_eq!(questions.next_question().await.unwrap().as_deref(), Some("first?"));
        assert_eq!(questions.next_question().await.unwrap().as_deref(), Some(""));
        assert_eq!(questions.next_question().await.unwrap().as_deref(), Some("second?"));
        assert_eq!(questions.next_question().await.unwrap(), None);
        assert_eq!(questions.prompt_out, b"> > > > ".to_vec());
    }

    #[tokio::test]
    async fn test_channel_questions_read_until_eof() {
        let lines = spawn_line_reader(Cursor::new("first?\r\nsecond?\n"));
        let mut questions = ChannelQuestions::new(lines, Vec::new()).with_prompt("> ");

        assert_eq!(questions.next_question().await.unwrap().as_deref(), Some("first?"));
        assert_eq!(questions.next_question().await.unwrap().as_deref(), Some("second?"));
        assert_eq!(questions.next_question().await.unwrap(), None);
        assert_eq!(questions.prompt_out, b"> > > ".to_vec());
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "terminal gone"))
        }
    }

    #[tokio::test]
    async fn test_channel_questions_surface_read_error() {
        let lines = spawn_line_reader(std::io::BufReader::new(BrokenReader));
        let mut questions = ChannelQuestions::new(lines, tokio::io::sink()).with_prompt("");

        assert!(matches!(questions.next_question().await, Err(AgentError::IoError(_))));
        assert_eq!(questions.next_question().await.unwrap(), None);
    }

    /// Blocks in `read` until the paired sender is dropped.
    struct StalledReader(std::sync::mpsc::Receiver<()>);

    impl Read for StalledReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_runtime_shuts_down_while_read_is_pending() {
        let (hold, stalled) = std::sync::mpsc::channel();
        let lines = spawn_line_reader(std::io::BufReader::new(StalledReader(stalled)));
        let mut questions = ChannelQuestions::new(lines, tokio::io::sink());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .unwrap();
        let waited = runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_millis(20), questions.next_question()).await
        });
        assert!(waited.is_err());

        let start = std::time::Instant::now();
        drop(runtime);
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        drop(hold);
    }

    #[tokio::test]
    async fn test_presenter_lists_sub_questions_then_answer() {
        let mut failed = SubQuestion::new(2, "Revenue? (fiscal year 2020)", "year_2020");
        failed.status = SubQuestionStatus::Failed;
        let mut answered = SubQuestion::new(1, "Revenue? (fiscal year 2019)", "year_2019");
        answered.status = SubQuestionStatus::Answered;

        let turn = ConversationTurn::answered(
            "Revenue?".to_string(),
            AnswerResult {
                final_answer: "$14.1 billion".to_string(),
                sub_questions: vec![answered, failed],
            },
        );

        let mut presenter = TextPresenter::new(Vec::new());
        presenter.present(&turn).await.unwrap();
        let text = String::from_utf8(presenter.into_inner()).unwrap();

        assert!(text.starts_with("Generated 2 sub questions.\n"));
        assert!(text.contains("[year_2019] Q: Revenue? (fiscal year 2019)\n"));
        assert!(text.contains("[year_2020] Q: Revenue? (fiscal year 2020) [failed]\n"));
        assert!(text.find("year_2020").unwrap() < text.find("$14.1 billion").unwrap());
    }

    #[test]
    fn test_error_turn_shows_marker() {
        let turn = ConversationTurn::failed("Revenue?".to_string(), vec![], "backend down".to_string());
        let text = format_turn(&turn);
        assert!(text.starts_with("Unable to answer this question."));
        assert!(text.contains("(error: backend down)"));
    }
}
