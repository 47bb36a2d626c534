use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};

use daysmith_core::{Assistant, ConversationEngine, MockCalendarProvider};
use daysmith_memory::{PromptEmbedder, RetrievalOrchestrator, SqliteStore};
use daysmith_provider::gemini::DEFAULT_GEMINI_MODEL;
use daysmith_provider::{create_provider, ProviderConfig, ProviderType};
use daysmith_schema::TurnKind;

#[derive(Parser)]
#[command(name = "daysmith", version, about = "daysmith scheduling assistant")]
struct Cli {
    #[arg(long, default_value = "daysmith.db", help = "Similarity store path")]
    db: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Interactive scheduling chat (quit/clear/context commands)")]
    Chat {
        #[arg(long, default_value = DEFAULT_GEMINI_MODEL, help = "Text generation model")]
        model: String,
        #[arg(long, default_value = "cli", help = "Session ID")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Chat { model, session } => run_chat(&cli.db, &model, &session).await?,
    }

    Ok(())
}

fn build_provider() -> Result<Arc<dyn daysmith_provider::TextProvider>> {
    match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            tracing::info!("using gemini provider");
            create_provider(&ProviderConfig::new("gemini", ProviderType::Gemini).with_api_key(key))
        }
        _ => {
            tracing::warn!("GEMINI_API_KEY not set, using offline stub provider");
            create_provider(&ProviderConfig::new("stub", ProviderType::Stub))
        }
    }
}

async fn run_chat(db: &std::path::Path, model: &str, session: &str) -> Result<()> {
    let provider = build_provider()?;
    let store = Arc::new(SqliteStore::open(db)?);
    let embedder = PromptEmbedder::new(provider.clone(), model);
    let recall = Arc::new(RetrievalOrchestrator::new(embedder, store));
    let calendar = Arc::new(MockCalendarProvider::with_fixtures(Utc::now().date_naive()));
    let assistant = Assistant::new(ConversationEngine::new(provider, calendar, recall, model));

    println!("daysmith scheduling assistant. Describe your scheduling problem.");
    println!("Commands: quit, clear, context");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => break,
            "clear" => {
                assistant.reset_session(session);
                println!("Session cleared.");
            }
            "context" => match assistant.get_context(session).await {
                Some(ctx) => println!("{}", serde_json::to_string_pretty(&ctx)?),
                None => println!("No active session."),
            },
            text => {
                let reply = assistant.submit_turn(session, text).await;
                println!("{}", reply.message);
                if let Some(proposal) = &reply.proposal {
                    println!("\nProposal (revision {}):", proposal.revision);
                    for change in &proposal.changes {
                        println!(
                            "  [{:?}] {} ({} - {})",
                            change.kind,
                            change.event.title,
                            change.event.start.format("%H:%M"),
                            change.event.end.format("%H:%M")
                        );
                        println!("    {}", change.rationale);
                    }
                    println!(
                        "  Sleep estimate: {:.1}h{}",
                        proposal.sleep_assessment.estimated_sleep_hours,
                        if proposal.sleep_assessment.below_target {
                            " (below target)"
                        } else {
                            ""
                        }
                    );
                }
                if reply.kind == TurnKind::Error && !reply.suggestions.is_empty() {
                    println!("Suggestions:");
                    for suggestion in &reply.suggestions {
                        println!("  - {suggestion}");
                    }
                }
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}
