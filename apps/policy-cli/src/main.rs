//! Policy CLI
//!
//! Drives the policy pipeline from the command line:
//!
//! - `extract`: print the text extracted from a document
//! - `analyze`: send a document to the analysis service and print the result
//! - `chat`: ask questions about a document, one-shot or interactively
//! - `history`: list past analysis summaries for a document id
//!
//! Results go to stdout, logs to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use policy_core::PolicyConfig;
use tracing::{debug, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "policy")]
#[command(version, about = "Insurance policy document extraction, analysis and chat")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Analysis service endpoint (overrides POLICY_ANALYSIS_URL)
    #[arg(long, global = true)]
    analysis_url: Option<String>,

    /// Chat service endpoint (overrides POLICY_CHAT_URL)
    #[arg(long, global = true)]
    chat_url: Option<String>,

    /// History database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Request timeout in milliseconds (overrides POLICY_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Maximum PDF pages to extract (overrides POLICY_MAX_PAGES)
    #[arg(long, global = true)]
    max_pages: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the extracted text of a document
    Extract {
        /// Plain text or PDF file
        path: PathBuf,
    },
    /// Analyze a document, or pasted text with --text
    Analyze {
        /// Plain text or PDF file
        #[arg(required_unless_present = "text", conflicts_with = "text")]
        path: Option<PathBuf>,

        /// Analyze this text instead of a file
        #[arg(long)]
        text: Option<String>,

        /// Record history under this id instead of a generated one, so
        /// repeated runs on the same policy share a history
        #[arg(long)]
        document_id: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask questions about a document
    Chat {
        /// Plain text or PDF file
        path: PathBuf,

        /// Question to ask; repeat for several. Without any, read from stdin.
        #[arg(short, long = "question")]
        questions: Vec<String>,
    },
    /// List recent analysis summaries for a document
    History {
        /// Document id printed by (or passed to) `analyze --document-id`
        document_id: String,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    /// Environment first, then command-line overrides
    fn config(&self) -> anyhow::Result<PolicyConfig> {
        let mut config = PolicyConfig::from_env()?;
        if let Some(url) = &self.analysis_url {
            config.analysis_url = url.clone();
        }
        if let Some(url) = &self.chat_url {
            config.chat_url = url.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
        if let Some(max_pages) = self.max_pages {
            anyhow::ensure!(max_pages > 0, "--max-pages must be at least 1");
            config.max_pages = max_pages;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.config()?;
    debug!("Configuration: {:?}", config);

    match args.command {
        Command::Extract { path } => commands::extract(&config, &path).await,
        Command::Analyze {
            path,
            text,
            document_id,
            json,
        } => {
            if let Some(id) = &document_id {
                anyhow::ensure!(!id.trim().is_empty(), "--document-id must not be empty");
            }
            let input = match (path, text) {
                (_, Some(text)) => commands::Input::Text(text),
                (Some(path), None) => commands::Input::File(path),
                (None, None) => anyhow::bail!("either a path or --text is required"),
            };
            commands::analyze(&config, input, document_id, json).await
        }
        Command::Chat { path, questions } => commands::chat(&config, &path, questions).await,
        Command::History { document_id, json } => {
            commands::history(&config, &document_id, json).await
        }
    }
}
