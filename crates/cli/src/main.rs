use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use techai_agents::{load_tips, ChatCommand, SupportAgent};
use techai_classifier::IntentRouter;
use techai_core::Mode;
use techai_gateway::{ReplyEngine, SerpApiClient};
use techai_observability::{init_tracing, AppMetrics};
use techai_storage::Store;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "techai")]
#[command(about = "Tech-AI Support CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive support chat against the local agent.
    Chat {
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value = "unerfahren")]
        mode: String,
    },
    /// Classify one message without touching any session.
    Intent { message: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("techai_cli");
    let cli = Cli::parse();

    let agent = build_agent().await?;

    match cli.command {
        Command::Chat { session, mode } => {
            let mode = Mode::from_optional_str(Some(&mode));
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            run_chat(agent, session_id, mode).await?;
        }
        Command::Intent { message } => {
            let prediction = agent.classify_message(&message).await?;
            println!(
                "{}",
                serde_json::json!({
                    "intent": prediction.intent,
                    "confidence": prediction.confidence,
                    "model": prediction.model,
                })
            );
        }
    }

    Ok(())
}

async fn run_chat(agent: SupportAgent<Store>, session_id: String, mode: Mode) -> Result<()> {
    println!("Tech-AI Chat (Sitzung {session_id}).");
    println!("Befehle: 'exit', '/neu' (neues Thema), '/geloest' (Problem gelöst).");

    let mut new_topic = false;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().read_line(&mut line)?;

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message.is_empty() {
            continue;
        }
        if message == "/neu" {
            new_topic = true;
            println!("Nächste Nachricht startet ein neues Thema.\n");
            continue;
        }
        if message == "/geloest" {
            let snapshot = agent.mark_solved(&session_id).await?;
            println!(
                "Thema als gelöst markiert ({} / {} Antworten).\n",
                snapshot.answer_count, snapshot.free_limit
            );
            continue;
        }

        let mut command = ChatCommand::text(session_id.clone(), message.to_string());
        command.mode = mode;
        command.new_topic = new_topic;
        new_topic = false;

        let outcome = agent.handle_chat(command).await?;

        println!("\n{}\n", outcome.reply.reply);
        if !outcome.reply.suggestions.is_empty() {
            println!("Vorschläge:");
            for suggestion in &outcome.reply.suggestions {
                println!("- {suggestion}");
            }
            println!();
        }
        for shortcut in &outcome.reply.app_shortcuts {
            println!("[{}] {}", shortcut.label, shortcut.url);
        }
        println!(
            "Antworten in diesem Thema: {} / {}\n",
            outcome.answer_count, outcome.free_limit
        );
    }

    Ok(())
}

async fn build_agent() -> Result<SupportAgent<Store>> {
    let metrics = AppMetrics::shared();

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(6))
        .timeout(Duration::from_secs(30))
        .build()?;

    let engine = ReplyEngine::load_default(http_client.clone());
    let classifier = IntentRouter::load_default(&engine);
    let search = SerpApiClient::from_env(http_client);

    let store = if let Ok(database_url) = env::var("TECHAI_DATABASE_URL") {
        Store::sqlite(&database_url).await?
    } else {
        Store::memory()
    };

    let tips_path =
        PathBuf::from(env::var("TECHAI_TIPS_PATH").unwrap_or_else(|_| "tech-tips.txt".to_string()));
    let learn_later_path = PathBuf::from(
        env::var("TECHAI_LEARN_LATER_PATH").unwrap_or_else(|_| "learn_later.txt".to_string()),
    );

    Ok(SupportAgent::new(
        engine,
        classifier,
        Arc::new(store),
        metrics,
        search,
        load_tips(&tips_path),
        learn_later_path,
    ))
}
