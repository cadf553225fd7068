use filing_qa_agent::{
    app::App,
    backend::Backends,
    config::Settings,
    loader::DirectoryLoader,
    session::{CloseReason, InteractiveSession, LineQuestions, TextPresenter},
    TurnOutcome, NO_RELEVANT_DATA,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FILING_2019: &str = "<html><body><p>Uber Technologies annual report 2019.</p>\
<p>Total revenue was $14.1 billion, up 26% year over year.</p></body></html>";

const FILING_2020: &str = "<html><body><p>Uber Technologies annual report 2020.</p>\
<p>Total revenue was $11.1 billion, down 21% year over year.</p></body></html>";

fn write_filings(dir: &Path) {
    std::fs::write(dir.join("UBER_2019.html"), FILING_2019).unwrap();
    std::fs::write(dir.join("UBER_2020.html"), FILING_2020).unwrap();
}

fn app(data: &TempDir, storage: &TempDir) -> App {
    let settings = Settings {
        years: vec![2019, 2020],
        data_dir: data.path().to_path_buf(),
        storage_dir: storage.path().to_path_buf(),
        ..Settings::default()
    };
    let loader = Arc::new(DirectoryLoader::new(data.path()));
    App::new(settings, Backends::offline(), loader).unwrap()
}

#[tokio::test]
async fn test_load_data_persists_and_reuses_indices() {
    let data = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    write_filings(data.path());

    let app = app(&data, &storage);
    let first = app.load_data(false).await;
    assert!(first.failed().next().is_none());
    assert!(storage.path().join("2019").join("index.json").exists());
    assert!(storage.path().join("2020").join("index.json").exists());

    let second = app.load_data(false).await;
    let built_at = |report: &filing_qa_agent::app::LoadReport| {
        report.succeeded().map(|i| i.built_at).collect::<Vec<_>>()
    };
    assert_eq!(built_at(&first), built_at(&second));

    let rebuilt = app.load_data(true).await;
    assert_ne!(built_at(&first), built_at(&rebuilt));
}

#[tokio::test]
async fn test_revenue_comparison_from_persisted_indices() {
    let data = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    write_filings(data.path());

    app(&data, &storage).load_data(false).await;

    // A fresh process only sees what was persisted.
    let app = app(&data, &storage);
    let tools = app.prepare_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["year_2019", "year_2020"]);

    let result = app
        .engine()
        .answer("How did revenue change between 2019 and 2020?", &tools)
        .await
        .unwrap();

    let routed: Vec<&str> = result.sub_questions.iter().map(|s| s.tool_name.as_str()).collect();
    assert_eq!(routed, vec!["year_2019", "year_2020"]);
    assert!(result.sub_questions.iter().all(|s| s.is_answered()));
    assert!(result.final_answer.contains("$14.1 billion"));
    assert!(result.final_answer.contains("$11.1 billion"));
    assert!(result.final_answer.find("$14.1 billion") < result.final_answer.find("$11.1 billion"));
}

#[tokio::test]
async fn test_chat_session_over_text_streams() {
    let data = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    write_filings(data.path());

    let app = app(&data, &storage);
    let tools = app.prepare_tools().await.unwrap();
    let mut session = InteractiveSession::new(Arc::new(app.engine()), tools, CancellationToken::new())
        .with_history(app.history_config());

    let input: &[u8] = b"What was revenue in 2019?\n\nWhat was revenue in 2015?\nquit\nnever read\n";
    let mut questions = LineQuestions::new(input, tokio::io::sink());
    let mut presenter = TextPresenter::new(Vec::new());

    let reason = session.run(&mut questions, &mut presenter).await.unwrap();
    assert_eq!(reason, CloseReason::ExitRequested);

    let turns = session.state().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].outcome, TurnOutcome::Answered);
    assert_eq!(turns[0].sub_questions[0].tool_name, "year_2019");
    assert_eq!(turns[1].outcome, TurnOutcome::NoRelevantData);
    assert_eq!(turns[1].final_answer, NO_RELEVANT_DATA);

    let output = String::from_utf8(presenter.into_inner()).unwrap();
    assert!(output.contains("[year_2019] Q: What was revenue in 2019?"));
    assert!(output.contains("$14.1 billion"));
    assert!(output.contains(NO_RELEVANT_DATA));
}
