//! # docsage CLI
//!
//! Ask questions about a private document collection from the terminal,
//! or serve the same pipelines over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! docsage --config ./config/docsage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsage init` | Create the index database |
//! | `docsage ingest <path>` | Ingest a file, or every supported file in a directory |
//! | `docsage ask "<question>"` | Answer a question, printing the NDJSON event stream |
//! | `docsage reset` | Remove every document from the knowledge base |
//! | `docsage stats` | Show document and chunk counts |
//! | `docsage serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! docsage init
//! docsage ingest ./handbook/
//! docsage ask "How many leave days do new hires get?"
//! docsage ask "and after five years?" --history ./chat.json
//! ```

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;

use docsage::config;
use docsage::index::SqliteIndex;
use docsage::logging;
use docsage::models::ConversationTurn;
use docsage::pipeline::QueryRequest;
use docsage::server;
use docsage::services::Services;

/// docsage: retrieval-augmented question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsage",
    about = "docsage: ask questions about your documents and get cited, streamed answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file and its tables. Safe to run repeatedly.
    Init,

    /// Ingest a document, or every supported document below a directory.
    ///
    /// Supported formats: .pdf, .docx, .pptx, .txt, .md. Each run assigns
    /// new document ids, so ingesting a file twice indexes it twice.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Name to record for a single file (defaults to its file name).
        #[arg(long)]
        filename: Option<String>,
    },

    /// Ask a question and print the answer as NDJSON events.
    Ask {
        /// The question.
        question: String,

        /// JSON file holding earlier turns:
        /// `[{"role": "user", "content": "..."}, ...]`.
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Remove every document and chunk from the knowledge base.
    Reset,

    /// Show document and chunk counts.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::open(&cfg).await?;
            index.pool().close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, filename } => {
            let services = Services::from_config(&cfg).await?;
            if path.is_dir() {
                let summary = services.ingestion.ingest_path(&path).await;
                for report in &summary.ingested {
                    println!(
                        "Ingested {} ({} chunks, doc {})",
                        report.filename, report.chunks_created, report.doc_id
                    );
                }
                for (file, err) in &summary.failed {
                    eprintln!("Failed {}: {}", file.display(), err);
                }
                println!(
                    "{} ingested, {} skipped, {} failed",
                    summary.ingested.len(),
                    summary.skipped.len(),
                    summary.failed.len()
                );
                if !summary.failed.is_empty() {
                    anyhow::bail!("{} file(s) failed to ingest", summary.failed.len());
                }
            } else {
                let filename = filename.unwrap_or_else(|| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
                let report = services.ingestion.ingest_document(&path, &filename).await?;
                println!(
                    "Ingested {} ({} chunks, doc {})",
                    report.filename, report.chunks_created, report.doc_id
                );
            }
        }
        Commands::Ask { question, history } => {
            let messages: Vec<ConversationTurn> = match history {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    serde_json::from_str(&raw)?
                }
                None => Vec::new(),
            };
            let services = Services::from_config(&cfg).await?;
            let mut events = services
                .query
                .run(QueryRequest::new(question).with_history(messages));

            let mut failed = false;
            while let Some(event) = events.next().await {
                failed |= event.is_terminal_error();
                print!("{}", event.to_ndjson_line());
            }
            if failed {
                anyhow::bail!("query failed");
            }
        }
        Commands::Reset => {
            let services = Services::from_config(&cfg).await?;
            services.ingestion.reset_knowledge_base().await?;
            println!("Knowledge base reset.");
        }
        Commands::Stats => {
            let services = Services::from_config(&cfg).await?;
            let stats = services.stats().await?;
            println!("documents: {}", stats.documents);
            println!("chunks:    {}", stats.chunks);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
