use clap::{Args, Parser, Subcommand};
use filing_qa_agent::{
    app::App,
    config::Settings,
    session::{CloseReason, InteractiveSession, StdinQuestions, StdoutPresenter},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "filing-qa", about = "Question answering over annual reports, one index per fiscal year")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Debug logging (RUST_LOG still wins when set)
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build or refresh the persisted index for every configured year
    LoadData(LoadDataArgs),
    /// Interactive question loop over the persisted indices
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
struct LoadDataArgs {
    /// Rebuild even when the cached index is current
    #[arg(long)]
    rebuild: bool,
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::LoadData(args) => load_data(args).await,
        Command::Chat(args) => chat(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_for(years: Vec<i32>) -> Result<Settings, Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    if years.is_empty() {
        Ok(settings)
    } else {
        Ok(settings.with_years(years)?)
    }
}

async fn load_data(args: LoadDataArgs) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::from_settings(settings_for(args.years)?)?;
    let report = app.load_data(args.rebuild).await;

    for index in report.succeeded() {
        println!(
            "{}: {} chunks -> {}",
            index.year,
            index.chunk_count(),
            index.backing_store_path.display()
        );
    }
    for (year, error) in report.failed() {
        println!("{}: FAILED ({})", year, error);
    }

    if report.all_failed() {
        return Err("no year could be indexed".into());
    }
    Ok(())
}

async fn chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::from_settings(settings_for(args.years)?)?;
    let tools = app.prepare_tools().await?;

    info!(
        tools = ?tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
        storage_dir = %app.settings().storage_dir.display(),
        planner = ?app.settings().planner,
        "Chat ready"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => on_interrupt.cancel(),
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let engine = Arc::new(app.engine());
    let mut session =
        InteractiveSession::new(engine, tools, cancel).with_history(app.history_config());

    let reason = session
        .run(&mut StdinQuestions::stdin(), &mut StdoutPresenter::stdout())
        .await?;

    if reason == CloseReason::Cancelled {
        println!();
    }
    info!(turns = session.state().len(), reason = ?reason, "Goodbye");
    Ok(())
}
