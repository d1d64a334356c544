use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kpi_assistant::assistant::{load_vector_store, register_assistant};
use kpi_assistant::config::{log_directive, Cli, Settings};
use kpi_assistant::{BackendClient, Conversation, OpenAIClient, RunOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(cli.verbose)));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let settings = Settings::from_cli(cli)?;

    let openai = OpenAIClient::with_timeout(
        settings.openai_api_key.clone(),
        &settings.openai_base_url,
        settings.http_timeout,
    )?;
    let backend = BackendClient::new(&settings.backend, settings.http_timeout)?;

    let vector_store_id = load_vector_store(&openai, &settings.file, settings.poll)
        .await
        .with_context(|| format!("Failed to index {}", settings.file.display()))?;
    let assistant_id = register_assistant(&openai, &settings.model, &vector_store_id).await?;

    let conversation = Conversation::start(&openai, &backend, &assistant_id, settings.poll).await?;

    if settings.queries.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if matches!(query, "exit" | "quit") {
                break;
            }
            report(conversation.ask(query).await?);
        }
    } else {
        for query in &settings.queries {
            println!("> {query}");
            report(conversation.ask(query).await?);
        }
    }

    info!(name: "conversation.finished", thread_id = %conversation.thread_id(), "Done");
    Ok(())
}

fn report(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Completed { reply } => println!("{reply}"),
        RunOutcome::Failed {
            status,
            last_message,
            error,
        } => {
            warn!(name: "run.failed", %status, error = ?error, "Run failed.");
            if let Some(message) = last_message {
                println!("{message}");
            }
        }
        RunOutcome::TimedOut { run_id, waited } => {
            warn!(name: "run.timed_out", %run_id, ?waited, "Run did not finish in time");
        }
    }
}
