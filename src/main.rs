//! # Site Assist CLI (`siteassist`)
//!
//! ## Usage
//!
//! ```bash
//! siteassist --config ./config/site.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `siteassist init` | Create the SQLite database and run schema migrations |
//! | `siteassist serve` | Start the HTTP API |
//! | `siteassist chat` | Talk to the assistant in the terminal |
//! | `siteassist ingest <paths-or-urls>...` | Scrape, chunk, and embed site content |
//! | `siteassist jobs add` / `jobs list` | Manage open positions |
//! | `siteassist inquiries list` | Show recent contact and training inquiries |
//!
//! ## Examples
//!
//! ```bash
//! siteassist init --config ./config/site.toml
//! siteassist ingest ./site/dist https://example.com/services --config ./config/site.toml
//! siteassist jobs add --title "AI Engineer" --description "LLM systems" --config ./config/site.toml
//! siteassist serve --config ./config/site.toml
//! siteassist chat --endpoint http://127.0.0.1:8787
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use site_assist::config::{self, Config};
use site_assist::conversation::{ChatSession, SessionSettings};
use site_assist::intent::IntentClassifier;
use site_assist::models::{ConversationMessage, Job, MessageAction, Sender};
use site_assist::rag::{RagPipeline, RemoteRagClient, ReplyGenerator};
use site_assist::{db, ingest, jobs, migrate, server, submit};

/// Site Assist: chat assistant, lead forms, and knowledge retrieval for an
/// IT services website.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/site.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "siteassist", version, about = "Chat assistant and lead-capture backend for an IT services website")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/site.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Chat with the assistant from the terminal.
    ///
    /// Without `--endpoint` replies are generated in-process from the local
    /// database; with it, general questions go to a running server's
    /// `/rag-chat`.
    Chat {
        /// Base URL of a running server, e.g. `http://127.0.0.1:8787`.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Scrape files, directories, or URLs into the knowledge base.
    Ingest {
        /// Local paths or `http(s)://` URLs.
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Manage job postings.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Inspect stored inquiries.
    Inquiries {
        #[command(subcommand)]
        action: InquiriesAction,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Add a job posting; the slug is derived from the title.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "Remote")]
        location: String,
        #[arg(long, default_value = "Full-time")]
        employment_type: String,
    },
    /// List job postings, newest first.
    List,
}

#[derive(Subcommand)]
enum InquiriesAction {
    /// List recent inquiries, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("site_assist=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat { endpoint } => {
            run_chat(&cfg, endpoint).await?;
        }
        Commands::Ingest { inputs } => {
            ingest::run_ingest(&cfg, &inputs).await?;
        }
        Commands::Jobs { action } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            match action {
                JobsAction::Add {
                    title,
                    description,
                    location,
                    employment_type,
                } => {
                    let job = jobs::create_job(
                        &pool,
                        &jobs::NewJob {
                            title,
                            description,
                            location,
                            employment_type,
                        },
                    )
                    .await?;
                    println!("Created job {} ({})", job.slug, job.id);
                }
                JobsAction::List => jobs::run_list(&pool).await?,
            }
        }
        Commands::Inquiries { action } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            match action {
                InquiriesAction::List { limit } => submit::run_list_inquiries(&pool, limit).await?,
            }
        }
    }

    Ok(())
}

async fn run_chat(cfg: &Config, endpoint: Option<String>) -> Result<()> {
    let (generator, titles): (Arc<dyn ReplyGenerator>, Vec<String>) = match endpoint {
        Some(url) => {
            let titles = remote_job_titles(&url, cfg.chat.timeout_secs).await;
            (Arc::new(RemoteRagClient::new(url, cfg.chat.timeout_secs)?), titles)
        }
        None => {
            let pool = db::connect(cfg).await?;
            migrate::apply(&pool).await?;
            let titles = jobs::list_jobs(&pool)
                .await?
                .into_iter()
                .map(|j| j.title)
                .collect();
            (Arc::new(RagPipeline::new(pool, Arc::new(cfg.clone()))), titles)
        }
    };

    let session = ChatSession::new(
        generator,
        Arc::new(IntentClassifier::default().with_job_titles(titles)),
        SessionSettings::from(cfg),
    );

    // Staged hand-off messages arrive after the prompt returns, so print
    // everything from the transcript feed.
    let feed = session.subscribe();
    let printer = tokio::spawn(print_feed(feed));

    println!("Type a message (Ctrl-D to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        session.handle_user_message(line).await;
    }

    session.close().await;
    printer.abort();
    Ok(())
}

/// Print transcript messages until the feed closes; returns how many were
/// printed. A lagging receiver skips what it missed and keeps going.
async fn print_feed(mut feed: broadcast::Receiver<ConversationMessage>) -> usize {
    let mut printed = 0;
    loop {
        match feed.recv().await {
            Ok(message) => {
                print_message(&message);
                printed += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "chat output fell behind; messages dropped");
            }
            Err(RecvError::Closed) => return printed,
        }
    }
}

/// Open positions from a running server, so job requests typed in the CLI
/// are routed the same way the server would route them.
async fn remote_job_titles(endpoint: &str, timeout_secs: u64) -> Vec<String> {
    let url = format!("{}/jobs", endpoint.trim_end_matches('/'));
    let fetched = async {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        let listed: Vec<Job> = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok::<_, reqwest::Error>(listed)
    };
    match fetched.await {
        Ok(listed) => listed.into_iter().map(|j| j.title).collect(),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "could not load job titles; using built-in list");
            Vec::new()
        }
    }
}

fn print_message(message: &ConversationMessage) {
    if message.sender == Sender::User {
        return;
    }
    let speaker = message.agent_name.as_deref().unwrap_or("assistant");
    println!("{}: {}", speaker, message.text);
    if let Some(MessageAction::Redirect { route, delay_ms }) = &message.action {
        println!("  (redirecting to {} in {} ms)", route, delay_ms);
    }
    for source in &message.sources {
        if let Some(origin) = source.metadata.get("source").and_then(|s| s.as_str()) {
            println!("  source: {} ({:.2})", origin, source.similarity);
        }
    }
}
